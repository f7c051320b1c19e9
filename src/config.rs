use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::PathBuf;
use toml::Value;

pub fn load(config_path: Option<PathBuf>) -> Result<(Option<PathBuf>, Option<Vec<String>>)> {
    let mut vboxmanage: Option<PathBuf> = None;
    let mut protected: Option<Vec<String>> = None;

    if let Some(path) = config_path {
        let config_toml = read_toml(&path)?;
        vboxmanage = parse_vboxmanage(&config_toml);
        protected = parse_protected(&config_toml, &path)?;
    }
    Ok((vboxmanage, protected))
}

fn read_toml(path: &PathBuf) -> Result<Value> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).context("Invalid TOML in config file")
}

fn parse_vboxmanage(config: &Value) -> Option<PathBuf> {
    config
        .get("vboxmanage")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

fn parse_protected(config: &Value, path: &PathBuf) -> Result<Option<Vec<String>>> {
    let Some(value) = config.get("protected-snapshots") else {
        return Ok(None);
    };
    let entries = value.as_array().ok_or_else(|| {
        anyhow!(
            "'protected-snapshots' must be an array in config file: {}",
            path.display()
        )
    })?;
    Ok(Some(
        entries
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_supported_keys() {
        let config: Value = toml::from_str(
            "vboxmanage = \"/opt/vbox/VBoxManage\"\nprotected-snapshots = [\"clean\", \"done\"]\n",
        )
        .unwrap();
        assert_eq!(
            parse_vboxmanage(&config),
            Some(PathBuf::from("/opt/vbox/VBoxManage"))
        );
        let path = PathBuf::from("vbsnap.toml");
        assert_eq!(
            parse_protected(&config, &path).unwrap(),
            Some(vec!["clean".to_string(), "done".to_string()])
        );
    }

    #[test]
    fn missing_keys_fall_through() {
        let config: Value = toml::from_str("").unwrap();
        assert_eq!(parse_vboxmanage(&config), None);
        let path = PathBuf::from("vbsnap.toml");
        assert_eq!(parse_protected(&config, &path).unwrap(), None);
    }

    #[test]
    fn protected_must_be_an_array() {
        let config: Value = toml::from_str("protected-snapshots = \"clean\"\n").unwrap();
        let path = PathBuf::from("vbsnap.toml");
        assert!(parse_protected(&config, &path).is_err());
    }
}
