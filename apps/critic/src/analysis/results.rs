use std::collections::BTreeMap;

use tracing::warn;

use crate::analysis::passes::AnalysisPass;

/// `(pass, scene index)`; the scene index is `None` for whole-manuscript passes.
pub type ResultKey = (AnalysisPass, Option<usize>);

/// Output of one pass call. `text` is the model's reply verbatim; when the
/// call failed it is empty and `error` carries the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub pass: AnalysisPass,
    pub scene_index: Option<usize>,
    pub text: String,
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn completed(pass: AnalysisPass, scene_index: Option<usize>, text: String) -> Self {
        Self {
            pass,
            scene_index,
            text,
            error: None,
        }
    }

    pub fn failed(pass: AnalysisPass, scene_index: Option<usize>, error: String) -> Self {
        Self {
            pass,
            scene_index,
            text: String::new(),
            error: Some(error),
        }
    }

    pub fn key(&self) -> ResultKey {
        (self.pass, self.scene_index)
    }
}

/// All results of one run, at most one per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResults {
    entries: BTreeMap<ResultKey, AnalysisResult>,
}

impl AnalysisResults {
    /// Stores a result. A second result for the same key is dropped.
    pub fn insert(&mut self, result: AnalysisResult) -> bool {
        let key = result.key();
        if self.entries.contains_key(&key) {
            warn!("Duplicate result for {:?} ignored", key);
            return false;
        }
        self.entries.insert(key, result);
        true
    }

    pub fn get(&self, pass: AnalysisPass, scene_index: Option<usize>) -> Option<&AnalysisResult> {
        self.entries.get(&(pass, scene_index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.values().filter(|r| r.error.is_some()).count()
    }
}
