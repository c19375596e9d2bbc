// Multi-pass manuscript analysis.
// Passes and prompts are static configuration; the pipeline drives them
// through the model client and collects one result per (pass, scene).

pub mod passes;
pub mod pipeline;
pub mod prompts;
pub mod results;
pub mod segmenter;
