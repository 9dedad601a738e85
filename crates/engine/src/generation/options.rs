//! Per-call generation options (spec §6's `options` request field).
//!
//! Every field is optional; missing fields inherit model defaults from
//! [`crate::config::default_sampling`].

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<usize>,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

impl GenerationOptions {
    pub fn resolved(&self, model_type: &str) -> ResolvedOptions {
        let (def_temp, def_top_p, def_top_k) = crate::config::default_sampling(model_type);
        ResolvedOptions {
            temperature: self.temperature.unwrap_or(def_temp),
            top_p: self.top_p.unwrap_or(def_top_p),
            top_k: self.top_k.unwrap_or(def_top_k),
            max_tokens: self.max_tokens.unwrap_or(256),
            seed: self.seed.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub max_tokens: usize,
    pub seed: u64,
}
