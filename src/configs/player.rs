use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Upper bound of decoded frames held ahead of the scheduler (20 ms each).
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,
    #[serde(default = "default_decoder_program")]
    pub decoder_program: String,
    /// Extra flags placed before `-i`, e.g. reconnect options for HTTP inputs.
    #[serde(default)]
    pub decoder_input_args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_queued_frames: default_max_queued_frames(),
            decoder_program: default_decoder_program(),
            decoder_input_args: Vec::new(),
        }
    }
}

fn default_max_queued_frames() -> usize {
    150
}

fn default_decoder_program() -> String {
    "ffmpeg".to_string()
}
