/*++

Licensed under the Apache-2.0 license.

File Name:

    config.rs

Abstract:

    Optional TOML configuration for the OTP tool.

--*/

use anyhow::Context;
use emulator_otp_ctrl::OtpArgs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of a configuration file:
///
/// ```toml
/// [otp]
/// file_name = "otp.img"
/// ticks_per_us = 10
/// prng_seed = 3
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub otp: OtpArgs,
}

impl ToolConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Command line settings that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct OtpOverrides {
    pub image: Option<PathBuf>,
    pub read_only: bool,
    pub ticks_per_us: Option<u64>,
    pub seed: Option<u64>,
}

impl OtpOverrides {
    pub fn apply(&self, mut args: OtpArgs) -> OtpArgs {
        if let Some(image) = &self.image {
            args.file_name = Some(image.clone());
        }
        if self.read_only {
            args.read_only = true;
        }
        if let Some(ticks) = self.ticks_per_us {
            args.ticks_per_us = ticks;
        }
        if let Some(seed) = self.seed {
            args.prng_seed = Some(seed);
        }
        args
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[otp]\nfile_name = \"otp.img\"\nticks_per_us = 10").unwrap();
        let config = ToolConfig::load(file.path()).unwrap();
        assert_eq!(config.otp.file_name, Some(PathBuf::from("otp.img")));
        assert_eq!(config.otp.ticks_per_us, 10);
        assert!(!config.otp.read_only);
        assert_eq!(config.otp.prng_seed, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = ToolConfig::load(file.path()).unwrap();
        assert_eq!(config.otp.ticks_per_us, 1);
        assert_eq!(config.otp.file_name, None);
    }

    #[test]
    fn test_unknown_sections_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[flash]\nsize = 4").unwrap();
        assert!(ToolConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let args = OtpArgs {
            file_name: Some(PathBuf::from("a.img")),
            ticks_per_us: 4,
            prng_seed: Some(9),
            ..Default::default()
        };
        let overrides = OtpOverrides {
            image: Some(PathBuf::from("b.img")),
            read_only: true,
            ticks_per_us: None,
            seed: Some(1),
        };
        let args = overrides.apply(args);
        assert_eq!(args.file_name, Some(PathBuf::from("b.img")));
        assert!(args.read_only);
        assert_eq!(args.ticks_per_us, 4);
        assert_eq!(args.prng_seed, Some(1));

        let args = OtpOverrides::default().apply(args);
        assert_eq!(args.file_name, Some(PathBuf::from("b.img")));
    }
}
