use crate::config::{parse_duration, parse_size, Config, SCHEMA_VERSION};
use crate::error::{CodePalError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_repository(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_tools(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_agent(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CodePalError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_repository(config: &Config, errors: &mut Vec<ValidationError>) {
        let size_str = &config.repository.max_file_size;
        if parse_size(size_str).is_none() {
            errors.push(ValidationError::new(
                "repository.max_file_size",
                format!("Invalid size format: {}", size_str),
            ));
        }

        if config.repository.extensions.is_empty() {
            errors.push(ValidationError::new(
                "repository.extensions",
                "At least one file extension is required",
            ));
        }

        for ext in &config.repository.extensions {
            if !ext.starts_with('.') {
                errors.push(ValidationError::new(
                    "repository.extensions",
                    format!("Extension must start with '.': {}", ext),
                ));
            }
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.chunk_size < 16 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                format!("Chunk size must be at least 16, got {}", chunking.chunk_size),
            ));
        }

        // A window must advance by at least one UTF-8 scalar (up to 4 bytes)
        if chunking.overlap + 4 > chunking.chunk_size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk_size ({}) by at least 4",
                    chunking.overlap, chunking.chunk_size
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if provider != "hash" && provider != "fastembed" {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be 'hash' or 'fastembed', got '{}'", provider),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.index.ef_search == 0 {
            errors.push(ValidationError::new(
                "index.ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_tools(config: &Config, errors: &mut Vec<ValidationError>) {
        let tools = &config.tools;
        if tools.search_k == 0 || tools.search_k > tools.max_search_k {
            errors.push(ValidationError::new(
                "tools.search_k",
                format!(
                    "search_k must be between 1 and max_search_k ({}), got {}",
                    tools.max_search_k, tools.search_k
                ),
            ));
        }

        if tools.max_read_bytes == 0 || tools.max_read_bytes > tools.max_file_bytes {
            errors.push(ValidationError::new(
                "tools.max_read_bytes",
                "max_read_bytes must be positive and not exceed max_file_bytes",
            ));
        }

        if tools.max_list_depth == 0 {
            errors.push(ValidationError::new(
                "tools.max_list_depth",
                "Listing depth must be at least 1",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.llm.provider;
        let valid_providers = ["offline", "openai", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        // Hosted OpenAI needs a key; local Ollama does not
        if provider == "openai" {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if parse_duration(&config.llm.request_timeout).is_none() {
            errors.push(ValidationError::new(
                "llm.request_timeout",
                format!("Invalid duration format: {}", config.llm.request_timeout),
            ));
        }
    }

    fn validate_agent(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.agent.max_steps == 0 {
            errors.push(ValidationError::new(
                "agent.max_steps",
                "The agent needs at least one step",
            ));
        }

        if parse_duration(&config.agent.max_duration).is_none() {
            errors.push(ValidationError::new(
                "agent.max_duration",
                format!("Invalid duration format: {}", config.agent.max_duration),
            ));
        }

        if config.agent.max_observation_chars < 256 {
            errors.push(ValidationError::new(
                "agent.max_observation_chars",
                "Observation budget must be at least 256 characters",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_paths(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(CodePalError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_overlap_must_leave_room() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert_eq!(error_paths(&config), vec!["chunking.overlap"]);
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.llm.provider = "psychic".to_string();
        config.embedding.provider = "invalid".to_string();
        let paths = error_paths(&config);
        assert!(paths.contains(&"llm.provider".to_string()));
        assert!(paths.contains(&"embedding.provider".to_string()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.agent.max_steps = 0;
        config.repository.max_file_size = "huge".to_string();
        config.tools.search_k = 50;
        let paths = error_paths(&config);
        assert_eq!(paths.len(), 3);
    }
}
