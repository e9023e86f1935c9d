use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Process configuration, read once at startup from the environment.
/// There is no hot reload; a malformed override is a startup-time error.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub min_letter_size: u32,
    pub max_letter_size: u32,
    pub units_per_em: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".parse().unwrap(),
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./fonts_output"),
            max_upload_bytes: 50 * 1024 * 1024,
            min_letter_size: 50,
            max_letter_size: 5000,
            units_per_em: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("FONTMAKER_BIND_ADDR") {
            cfg.bind_addr = v.parse().map_err(|e| format!("FONTMAKER_BIND_ADDR: {e}"))?;
        }
        if let Ok(v) = env::var("FONTMAKER_UPLOAD_DIR") {
            cfg.upload_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FONTMAKER_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FONTMAKER_MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = v.parse().map_err(|e| format!("FONTMAKER_MAX_UPLOAD_BYTES: {e}"))?;
        }
        if let Ok(v) = env::var("FONTMAKER_MIN_LETTER_SIZE") {
            cfg.min_letter_size = v.parse().map_err(|e| format!("FONTMAKER_MIN_LETTER_SIZE: {e}"))?;
        }
        if let Ok(v) = env::var("FONTMAKER_MAX_LETTER_SIZE") {
            cfg.max_letter_size = v.parse().map_err(|e| format!("FONTMAKER_MAX_LETTER_SIZE: {e}"))?;
        }
        if let Ok(v) = env::var("FONTMAKER_UNITS_PER_EM") {
            cfg.units_per_em = v.parse().map_err(|e| format!("FONTMAKER_UNITS_PER_EM: {e}"))?;
        }

        std::fs::create_dir_all(&cfg.upload_dir)
            .map_err(|e| format!("creating upload dir {:?}: {e}", cfg.upload_dir))?;
        std::fs::create_dir_all(&cfg.output_dir)
            .map_err(|e| format!("creating output dir {:?}: {e}", cfg.output_dir))?;

        Ok(cfg)
    }

    /// The tiny-noise floor applied before any other classification.
    pub fn tiny_noise_floor(&self) -> u32 {
        (self.min_letter_size / 6).max(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.min_letter_size, 50);
        assert_eq!(cfg.max_letter_size, 5000);
        assert_eq!(cfg.units_per_em, 1024);
        assert_eq!(cfg.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn tiny_noise_floor_has_8px_minimum() {
        let mut cfg = Config::default();
        cfg.min_letter_size = 10;
        assert_eq!(cfg.tiny_noise_floor(), 8);
        cfg.min_letter_size = 60;
        assert_eq!(cfg.tiny_noise_floor(), 10);
    }

    #[test]
    fn bad_override_is_rejected() {
        std::env::set_var("FONTMAKER_MAX_UPLOAD_BYTES", "not-a-number");
        let result = Config::from_env();
        std::env::remove_var("FONTMAKER_MAX_UPLOAD_BYTES");
        assert!(result.is_err());
    }

    #[test]
    fn from_env_creates_missing_upload_and_output_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let upload_dir = tmp.path().join("uploads");
        let output_dir = tmp.path().join("fonts_output");

        std::env::set_var("FONTMAKER_UPLOAD_DIR", &upload_dir);
        std::env::set_var("FONTMAKER_OUTPUT_DIR", &output_dir);
        let cfg = Config::from_env().unwrap();
        std::env::remove_var("FONTMAKER_UPLOAD_DIR");
        std::env::remove_var("FONTMAKER_OUTPUT_DIR");

        assert_eq!(cfg.upload_dir, upload_dir);
        assert!(upload_dir.is_dir());
        assert!(output_dir.is_dir());
    }
}
