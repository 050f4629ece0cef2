use serde::{Deserialize, Serialize};

/// The `(mode, area, option)` triple a chunk must share with the pod that runs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffinityKey {
    pub mode: String,
    pub area: String,
    pub option: String,
}

impl AffinityKey {
    pub fn new(mode: impl Into<String>, area: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            area: area.into(),
            option: option.into(),
        }
    }

    pub fn matches(&self, mode: &str, area: &str, option: &str) -> bool {
        self.mode == mode && self.area == area && self.option == option
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_requires_all_fields() {
        let key = AffinityKey::new("car", "sg", "flexible");
        assert!(key.matches("car", "sg", "flexible"));
        assert!(!key.matches("truck", "sg", "flexible"));
        assert!(!key.matches("car", "us", "flexible"));
        assert!(!key.matches("car", "sg", "fast"));
    }
}
