//! Shared runtime configuration handed to every model-backed tool: whether a
//! real endpoint is configured, or whether the tool must fall back to its
//! deterministic offline stub (spec.md §9 "LLM absence").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperMode {
    Local,
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionMode {
    Local,
    Stub,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub llm_url: Option<String>,
    pub llm_model: Option<String>,
    pub whisper_mode: WhisperMode,
    pub vision_mode: VisionMode,
    pub http: reqwest::Client,
}

impl ToolConfig {
    pub fn new(
        llm_url: Option<String>,
        llm_model: Option<String>,
        whisper_mode: WhisperMode,
        vision_mode: VisionMode,
    ) -> Self {
        Self {
            llm_url,
            llm_model,
            whisper_mode,
            vision_mode,
            http: reqwest::Client::new(),
        }
    }

    pub fn llm_configured(&self) -> bool {
        self.llm_url.is_some()
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::new(None, None, WhisperMode::Stub, VisionMode::Stub)
    }
}
