//! Size-class table report.

use serde::Serialize;

use quickalloc_core::{QuickAllocConfig, SizeClass, SizeClassTable};

use crate::HarnessError;

#[derive(Debug, Clone, Serialize)]
pub struct SizeClassReport {
    pub config: QuickAllocConfig,
    pub alignment: usize,
    pub max_payload: usize,
    pub class_count: usize,
    pub classes: Vec<SizeClass>,
}

impl SizeClassReport {
    /// Builds the table `config` would produce, without reserving a pool.
    pub fn build(config: &QuickAllocConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let alignment = config.effective_alignment();
        let table = SizeClassTable::build(
            config.min_block_size,
            config.max_block_size,
            config.stepping,
            alignment,
        )?;
        Ok(Self {
            config: config.clone(),
            alignment,
            max_payload: table.max_payload(),
            class_count: table.len(),
            classes: table.iter().collect(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickalloc_core::SteppingMethod;

    #[test]
    fn test_default_report() {
        let report = SizeClassReport::build(&QuickAllocConfig::default()).unwrap();
        assert_eq!(report.alignment, 256);
        assert_eq!(report.class_count, report.classes.len());
        assert_eq!(report.classes[0].block_size, 256);
        assert!(report.max_payload >= 64 * 1024);
    }

    #[test]
    fn test_report_json_lists_classes() {
        let config = QuickAllocConfig::new(1 << 20, 32, 256, SteppingMethod::Geometric, false);
        let report = SizeClassReport::build(&config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["alignment"], 16);
        assert_eq!(value["config"]["stepping"], "geometric");
        let sizes: Vec<u64> = value["classes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["block_size"].as_u64().unwrap())
            .collect();
        assert_eq!(sizes, vec![32, 64, 128, 256, 272]);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let config = QuickAllocConfig::new(1 << 20, 512, 256, SteppingMethod::Linear, true);
        assert!(matches!(
            SizeClassReport::build(&config),
            Err(HarnessError::Alloc(_))
        ));
    }
}
