//! Collaborator doubles shared by the transfer and controller tests.

use std::sync::{Arc, Mutex};

use crate::collaborators::{DuplicateChoice, FileKind, ProgressSink, Prompter, TypeSniffer};
use crate::scsi::DeviceId;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
pub struct PromptLog {
    pub duplicates: Vec<Vec<String>>,
    pub upload_overwrites: Vec<String>,
    pub unrecognized: Vec<DeviceId>,
}

/// Answers prompts from fixed replies and records every question.
#[derive(Clone)]
pub struct ScriptedPrompter {
    pub duplicates: DuplicateChoice,
    pub overwrite_upload: bool,
    pub proceed_unrecognized: bool,
    pub log: Arc<Mutex<PromptLog>>,
}

impl Default for ScriptedPrompter {
    fn default() -> Self {
        Self {
            duplicates: DuplicateChoice::Cancel,
            overwrite_upload: false,
            proceed_unrecognized: false,
            log: Arc::default(),
        }
    }
}

impl ScriptedPrompter {
    pub fn answering(duplicates: DuplicateChoice) -> Self {
        Self {
            duplicates,
            ..Default::default()
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm_duplicates(&mut self, names: &[String]) -> DuplicateChoice {
        self.log.lock().unwrap().duplicates.push(names.to_vec());
        self.duplicates
    }

    fn confirm_upload_overwrite(&mut self, name: &str) -> bool {
        self.log.lock().unwrap().upload_overwrites.push(name.to_string());
        self.overwrite_upload
    }

    fn confirm_unrecognized_device(&mut self, device_id: DeviceId) -> bool {
        self.log.lock().unwrap().unrecognized.push(device_id);
        self.proceed_unrecognized
    }
}

#[derive(Debug, Default)]
pub struct ProgressLog {
    pub totals: Vec<u64>,
    pub percents: Vec<u8>,
    pub names: Vec<String>,
}

#[derive(Clone, Default)]
pub struct RecordingProgress(pub Arc<Mutex<ProgressLog>>);

impl RecordingProgress {
    pub fn last_percent(&self) -> Option<u8> {
        self.0.lock().unwrap().percents.last().copied()
    }
}

impl ProgressSink for RecordingProgress {
    fn set_total(&mut self, total: u64) {
        self.0.lock().unwrap().totals.push(total);
    }

    fn set_percent(&mut self, percent: u8) {
        self.0.lock().unwrap().percents.push(percent);
    }

    fn set_current_name(&mut self, name: &str) {
        self.0.lock().unwrap().names.push(name.to_string());
    }
}

/// Claims every file is a text file and records what it was shown.
#[derive(Clone, Default)]
pub struct RecordingSniffer(pub Arc<Mutex<Vec<(String, usize)>>>);

impl TypeSniffer for RecordingSniffer {
    fn infer(&mut self, first_chunk: &[u8], name: &str) -> Option<FileKind> {
        self.0.lock().unwrap().push((name.to_string(), first_chunk.len()));
        Some(FileKind {
            type_code: *b"TEXT",
            creator: *b"ttxt",
        })
    }
}

/// Deterministic non-repeating-looking file contents.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
