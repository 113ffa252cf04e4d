//! Persisted hunt results.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::gazetteer::Gazetteer;
use crate::hunt::HuntResult;
use crate::outcome::{GroundTruthInfo, OutcomeClassifier, Outcomes};

/// A finished hunt plus whatever ground truth was known when it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntRecord {
    #[serde(flatten)]
    pub result: HuntResult,
    #[serde(default)]
    pub gt_code: Option<String>,
    #[serde(default)]
    pub gt_info: Option<GroundTruthInfo>,
    #[serde(default)]
    pub outcomes: Option<Outcomes>,
}

impl HuntRecord {
    pub fn new(result: HuntResult) -> Self {
        Self {
            result,
            gt_code: None,
            gt_info: None,
            outcomes: None,
        }
    }

    /// Attaches ground truth from an airport code and classifies the hunt
    /// against it. Unknown codes are kept but leave the record unclassified.
    pub fn with_ground_truth_code(
        mut self,
        code: &str,
        gazetteer: &Gazetteer,
        validate_target_hop: bool,
    ) -> Self {
        self.gt_code = Some(code.trim().to_ascii_uppercase());
        match GroundTruthInfo::from_code(gazetteer, code) {
            Some(info) => self.with_ground_truth(info, gazetteer, validate_target_hop),
            None => {
                warn!(code, "ground truth code not in gazetteer");
                self
            }
        }
    }

    pub fn with_ground_truth(
        mut self,
        info: GroundTruthInfo,
        gazetteer: &Gazetteer,
        validate_target_hop: bool,
    ) -> Self {
        let outcomes = OutcomeClassifier::new(gazetteer, validate_target_hop)
            .classify_all(&self.result, &info);
        info!(
            country = %outcomes.country.label,
            country_reason = %outcomes.country.reason,
            city = %outcomes.city.label,
            "hunt classified"
        );
        self.gt_info = Some(info);
        self.outcomes = Some(outcomes);
        self
    }

    /// `{target}_{lat}_{lon}_{job}.json`, with `host` standing in for the
    /// origin and job of a host-run traceroute.
    pub fn file_name(&self) -> String {
        let r = &self.result;
        let (lat, lon) = match &r.origin {
            Some(p) => (p.latitude().to_string(), p.longitude().to_string()),
            None => ("host".to_string(), "host".to_string()),
        };
        let job = r
            .traceroute_job
            .or(r.ping_job)
            .map_or_else(|| r.started_unix_ms.to_string(), |j| j.to_string());
        format!("{}_{}_{}_{}.json", r.target, lat, lon, job).replace(':', "-")
    }

    /// Writes the record as pretty JSON into `dir`, creating it if needed.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        info!(path = %path.display(), "hunt record written");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
