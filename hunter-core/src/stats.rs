//! Outcome statistics over a directory of persisted hunts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gazetteer::Gazetteer;
use crate::outcome::{GroundTruthInfo, Outcome, OutcomeClassifier, OutcomeLabel, Reason};
use crate::record::HuntRecord;

/// One classified hunt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignRow {
    pub filename: String,
    pub num_countries: usize,
    pub num_cities: usize,
    pub num_locations: usize,
    pub country_outcome: OutcomeLabel,
    pub country_reason: Reason,
    pub city_outcome: OutcomeLabel,
    pub city_reason: Reason,
    pub target: String,
    pub traceroute_from_host: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub positive: usize,
    pub negative: usize,
    pub indeterminate: usize,
}

impl Counts {
    fn add(&mut self, outcome: &Outcome) {
        match outcome.label {
            OutcomeLabel::Positive => self.positive += 1,
            OutcomeLabel::Negative => self.negative += 1,
            OutcomeLabel::Indeterminate => self.indeterminate += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.indeterminate
    }

    /// Positives over determinate outcomes; `None` when nothing was determinate.
    pub fn precision(&self) -> Option<f64> {
        let determinate = self.positive + self.negative;
        if determinate == 0 {
            return None;
        }
        Some(self.positive as f64 / determinate as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub validate_target_hop: bool,
    pub classified: usize,
    pub country: Counts,
    pub city: Counts,
    pub country_precision: Option<f64>,
    pub city_precision: Option<f64>,
    /// Records carrying no usable ground truth.
    pub without_ground_truth: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Campaign {
    pub rows: Vec<CampaignRow>,
    pub summary: CampaignSummary,
}

/// Persisted records of a campaign directory, keyed by file name.
#[derive(Debug, Default)]
pub struct CampaignRecords {
    pub records: Vec<(String, HuntRecord)>,
    pub unreadable: Vec<PathBuf>,
}

/// Reads every `.json` file of `dir`. Files that are not hunt records are
/// listed as unreadable.
pub fn load_campaign<P: AsRef<Path>>(dir: P) -> Result<CampaignRecords> {
    let dir = dir.as_ref();
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    paths.sort();

    let mut out = CampaignRecords::default();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match HuntRecord::load(&path) {
            Ok(rec) => out.records.push((name, rec)),
            Err(err) => {
                warn!(path = %path.display(), "skipping unreadable record: {err}");
                out.unreadable.push(path);
            }
        }
    }
    info!(
        dir = %dir.display(),
        records = out.records.len(),
        unreadable = out.unreadable.len(),
        "campaign loaded"
    );
    Ok(out)
}

fn ground_truth(rec: &HuntRecord, gazetteer: &Gazetteer) -> Option<GroundTruthInfo> {
    rec.gt_info.clone().or_else(|| {
        rec.gt_code
            .as_deref()
            .and_then(|code| GroundTruthInfo::from_code(gazetteer, code))
    })
}

/// Classifies every record against its ground truth.
pub fn analyze(
    records: &[(String, HuntRecord)],
    gazetteer: &Gazetteer,
    validate_target_hop: bool,
) -> Campaign {
    let classifier = OutcomeClassifier::new(gazetteer, validate_target_hop);
    let mut campaign = Campaign::default();
    campaign.summary.validate_target_hop = validate_target_hop;

    for (name, rec) in records {
        let Some(gt) = ground_truth(rec, gazetteer) else {
            debug!(file = %name, "no ground truth");
            campaign.summary.without_ground_truth.push(name.clone());
            continue;
        };
        let outcomes = classifier.classify_all(&rec.result, &gt);
        campaign.summary.country.add(&outcomes.country);
        campaign.summary.city.add(&outcomes.city);
        let c = &rec.result.candidates;
        campaign.rows.push(CampaignRow {
            filename: name.clone(),
            num_countries: c.countries.len(),
            num_cities: c.cities.len(),
            num_locations: c.locations.len(),
            country_outcome: outcomes.country.label,
            country_reason: outcomes.country.reason,
            city_outcome: outcomes.city.label,
            city_reason: outcomes.city.reason,
            target: rec.result.target.to_string(),
            traceroute_from_host: rec.result.traceroute_from_host,
        });
    }

    campaign.rows.sort_by(|a, b| {
        (a.country_outcome, a.country_reason, &a.filename).cmp(&(
            b.country_outcome,
            b.country_reason,
            &b.filename,
        ))
    });
    let s = &mut campaign.summary;
    s.classified = campaign.rows.len();
    s.country_precision = s.country.precision();
    s.city_precision = s.city.precision();
    campaign
}

pub fn write_csv<W: Write>(rows: &[CampaignRow], writer: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gazetteer::Candidates;
    use crate::hunt::HuntResult;
    use crate::traceroute::{Hop, LastHop};

    const TEST_TARGET: &str = "198.41.0.4";

    fn gazetteer() -> Gazetteer {
        Gazetteer::from_tsv(
            "#IATA\tname\tcity\tcountry_code\tlat long\n\
             MAD\tBarajas\tMadrid\tES\t40.4719 -3.5626\n\
             LIS\tHumberto Delgado\tLisbon\tPT\t38.7813 -9.1359\n"
                .as_bytes(),
        )
        .unwrap()
    }

    fn record(countries: &[&str], cities: &[&str], gt: Option<&str>) -> HuntRecord {
        let mut r = HuntResult::new(TEST_TARGET.parse().unwrap(), None);
        r.traceroute = vec![
            Hop::new(1, vec![Some("10.0.0.1".parse().unwrap())]),
            Hop::new(2, vec![None]),
        ];
        r.last_hop = Some(LastHop {
            address: "10.0.0.1".parse().unwrap(),
            index: 0,
            from_end: 1,
            geolocation: None,
        });
        r.candidates = Candidates {
            cities: cities.iter().map(|s| s.to_string()).collect(),
            countries: countries.iter().map(|s| s.to_string()).collect(),
            locations: Vec::new(),
        };
        let mut rec = HuntRecord::new(r);
        rec.gt_code = gt.map(str::to_string);
        rec
    }

    fn campaign() -> Vec<(String, HuntRecord)> {
        vec![
            ("c.json".to_string(), record(&["ES"], &["Madrid"], Some("MAD"))),
            ("a.json".to_string(), record(&["PT"], &["Lisbon"], Some("MAD"))),
            ("b.json".to_string(), record(&["ES", "PT"], &["Madrid", "Lisbon"], Some("MAD"))),
            ("d.json".to_string(), record(&["ES"], &["Madrid"], None)),
        ]
    }

    #[test]
    fn counts_and_precision_without_validation() {
        let c = analyze(&campaign(), &gazetteer(), false);
        assert_eq!(c.summary.classified, 3);
        assert_eq!(c.summary.without_ground_truth, vec!["d.json".to_string()]);
        assert_eq!(
            c.summary.country,
            Counts {
                positive: 1,
                negative: 1,
                indeterminate: 1
            }
        );
        assert_eq!(c.summary.country_precision, Some(0.5));
        let order: Vec<&str> = c.rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(order, vec!["b.json", "a.json", "c.json"]);
    }

    #[test]
    fn validation_marks_silent_target_hop() {
        let c = analyze(&campaign(), &gazetteer(), true);
        assert_eq!(c.summary.country.indeterminate, 3);
        assert_eq!(c.summary.country_precision, None);
        assert!(c.rows.iter().all(|r| r.country_reason == Reason::UnresponsiveTargetHop));
    }

    #[test]
    fn csv_uses_reason_strings() {
        let c = analyze(&campaign(), &gazetteer(), false);
        let mut buf = Vec::new();
        write_csv(&c.rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "filename,num_countries,num_cities,num_locations,country_outcome,country_reason,\
             city_outcome,city_reason,target,traceroute_from_host"
        );
        assert!(text.contains("c.json,1,1,0,Positive,Same result airport,Positive,Same result airport"));
        assert!(text.contains("Too many results"));
    }

    #[test]
    fn load_campaign_lists_unreadable_files() {
        let dir = std::env::temp_dir().join(format!("hunter-stats-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let records = campaign();
        let (name, rec) = &records[0];
        rec.save_to(&dir.join(name)).unwrap();
        fs::write(dir.join("junk.json"), "{").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let loaded = load_campaign(&dir).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].0, "c.json");
        assert_eq!(loaded.unreadable.len(), 1);
        fs::remove_dir_all(dir).unwrap();
    }
}
