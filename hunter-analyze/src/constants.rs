pub const VALIDATED_SUFFIX: &str = "validated";
pub const UNVALIDATED_SUFFIX: &str = "unvalidated";
pub const DEFAULT_CSV_STEM: &str = "campaign";
pub const PERCENT: f64 = 100.0;
