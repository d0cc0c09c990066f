use std::path::Path;

use crate::convert::convert;
use crate::env::substitute_env;
use crate::error::ConfigError;
use crate::model::Config;
use crate::raw::RawConfig;

/// Reads the YAML file at `path`, substitutes `${VAR}` / `${VAR:-default}`
/// tokens from the environment, parses it, and validates the result into a
/// [`Config`]. Validation failures are collected and reported together.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let substituted = substitute_env(&text);

    let raw: RawConfig = serde_yaml::from_str(&substituted).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    convert(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_yaml(contents: &str) -> tempfile_path::TempYaml {
        tempfile_path::TempYaml::new(contents)
    }

    mod tempfile_path {
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempYaml {
            pub path: PathBuf,
        }

        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

        impl TempYaml {
            pub fn new(contents: &str) -> Self {
                let id = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let mut path = std::env::temp_dir();
                path.push(format!("keyrelay-config-test-{}-{id}.yaml", std::process::id()));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempYaml {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn loads_minimal_valid_config() {
        std::env::set_var("KEYRELAY_TEST_TOKEN", "secret-token");
        let yaml = r#"
providers:
  demo:
    provider_type: openai
    api_base_url: https://api.example.com/v1
    access_control:
      gateway_access_token: ${KEYRELAY_TEST_TOKEN}
    models:
      gpt-4o: {}
"#;
        let file = write_temp_yaml(yaml);
        let config = load_config(&file.path).expect("config should load");
        let provider = config.providers.get("demo").expect("provider present");
        assert_eq!(provider.gateway_token, "secret-token");
        assert!(provider.models.contains_key("gpt-4o"));
    }

    #[test]
    fn rejects_duplicate_gateway_tokens() {
        let yaml = r#"
providers:
  a:
    provider_type: openai
    api_base_url: https://a.example.com
    access_control:
      gateway_access_token: same-token
    models:
      m1: {}
  b:
    provider_type: openai
    api_base_url: https://b.example.com
    access_control:
      gateway_access_token: same-token
    models:
      m2: {}
"#;
        let file = write_temp_yaml(yaml);
        let err = load_config(&file.path).expect_err("duplicate tokens must fail validation");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_default_model_not_declared() {
        let yaml = r#"
providers:
  demo:
    provider_type: openai
    api_base_url: https://api.example.com
    default_model: not-declared
    access_control:
      gateway_access_token: tok
    models:
      m1: {}
"#;
        let file = write_temp_yaml(yaml);
        let err = load_config(&file.path).expect_err("bad default_model must fail validation");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
