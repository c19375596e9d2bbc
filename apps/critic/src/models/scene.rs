/// A contiguous, model-identified run of paragraphs.
///
/// `start` and `end` are 1-based and inclusive. `index` is the scene's
/// position in the segmentation (1-based) and is what the report uses;
/// `label` is whatever number the model gave the scene, kept only for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub index: usize,
    pub label: Option<u32>,
    pub summary: String,
    pub start: usize,
    pub end: usize,
}

impl Scene {
    pub fn paragraph_count(&self) -> usize {
        self.end + 1 - self.start
    }
}
