//! A self-hosted metadata store.
//!
//! [`LocalStore`] keeps vulnerabilities, notes and attestation occurrences in
//! memory and, when opened on a path, writes them back to a JSON file after
//! every change. The file is replaced atomically.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    create_attestation_signature, note_name, Fetcher, Note, Occurrence, RawAttestation,
    ReadOnlyClient, Vulnerability,
};
use crate::{authority::AttestationAuthority, image::resource_url, secrets::SigningSecret, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    /// Vulnerabilities by resource URL.
    #[serde(default)]
    vulnerabilities: Vec<(String, Vulnerability)>,
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    occurrences: Vec<Occurrence>,
}

#[derive(Debug)]
pub struct LocalStore {
    project: String,
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl LocalStore {
    /// An empty in-memory store.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            path: None,
            state: Mutex::default(),
        }
    }

    /// Opens the store backed by `path`, which need not exist yet.
    pub fn open(project: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened metadata store {path:?}");
        Ok(Self {
            project: project.into(),
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &State) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.write_all(b"\n")?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Records a vulnerability for `image`.
    pub fn add_vulnerability(&self, image: &str, vulnerability: Vulnerability) -> Result<()> {
        let mut state = self.lock();
        state
            .vulnerabilities
            .push((resource_url(image), vulnerability));
        self.save(&state)
    }

    /// Records an attestation made elsewhere under the authority's note,
    /// creating the note if needed.
    pub fn add_attestation(
        &self,
        image: &str,
        authority: &AttestationAuthority,
        attestation: RawAttestation,
    ) -> Result<Occurrence> {
        let note = super::get_or_create_attestation_note(self, authority)?;
        let mut state = self.lock();
        let occurrence = self.occurrence(&state, &note, image, attestation);
        state.occurrences.push(occurrence.clone());
        self.save(&state)?;
        Ok(occurrence)
    }

    /// Every recorded occurrence.
    pub fn occurrences(&self) -> Vec<Occurrence> {
        self.lock().occurrences.clone()
    }

    fn occurrence(
        &self,
        state: &State,
        note: &Note,
        image: &str,
        attestation: RawAttestation,
    ) -> Occurrence {
        Occurrence {
            name: format!(
                "projects/{}/occurrences/{}",
                self.project,
                state.occurrences.len() + 1
            ),
            note_name: note.name.clone(),
            resource_uri: resource_url(image),
            attestation,
        }
    }
}

impl ReadOnlyClient for LocalStore {
    fn vulnerabilities(&self, image: &str) -> Result<Vec<Vulnerability>> {
        let url = resource_url(image);
        Ok(self
            .lock()
            .vulnerabilities
            .iter()
            .filter(|(resource, _)| *resource == url)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn attestations(
        &self,
        image: &str,
        authority: &AttestationAuthority,
    ) -> Result<Vec<RawAttestation>> {
        let url = resource_url(image);
        let note = note_name(&self.project, authority);
        Ok(self
            .lock()
            .occurrences
            .iter()
            .filter(|o| o.resource_uri == url && o.note_name == note)
            .map(|o| o.attestation.clone())
            .collect())
    }
}

impl Fetcher for LocalStore {
    fn attestation_note(&self, authority: &AttestationAuthority) -> Result<Option<Note>> {
        let name = note_name(&self.project, authority);
        Ok(self.lock().notes.iter().find(|n| n.name == name).cloned())
    }

    fn create_attestation_note(&self, authority: &AttestationAuthority) -> Result<Note> {
        let note = Note {
            name: note_name(&self.project, authority),
            authority: authority.name.clone(),
            short_description: format!("Image attestation authority {}", authority.name),
            long_description: format!(
                "Attestations by {}/{}",
                authority.namespace, authority.name
            ),
        };
        let mut state = self.lock();
        state.notes.push(note.clone());
        self.save(&state)?;
        debug!("Created note {}", note.name);
        Ok(note)
    }

    fn create_attestation_occurrence(
        &self,
        note: &Note,
        image: &str,
        secret: &SigningSecret,
    ) -> Result<Occurrence> {
        let attestation = create_attestation_signature(image, secret)?;
        let mut state = self.lock();
        let occurrence = self.occurrence(&state, note, image, attestation);
        state.occurrences.push(occurrence.clone());
        self.save(&state)?;
        Ok(occurrence)
    }
}
