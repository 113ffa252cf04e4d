use clap::Parser;
use hunter_core::{
    parse_cf_ray, parse_host_traceroute, Gazetteer, GeoPoint, GroundTruthInfo, HuntConfig,
    HuntController, HuntError, HuntRecord, RefractivePreset, Replay, ReplayFixture,
    TracerouteSource,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::error::Error;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(about = "Geolocate one network target from ping constraints around its last hop")]
struct Args {
    /// Hunt configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    target: IpAddr,

    /// Origin of the platform traceroute.
    #[arg(long, allow_hyphen_values = true)]
    origin_lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    origin_lon: Option<f64>,

    /// Run the system `traceroute` from this host instead.
    #[arg(long)]
    host_traceroute: bool,

    /// Saved output of a system `traceroute` run.
    #[arg(long, conflicts_with = "host_traceroute")]
    traceroute_output: Option<PathBuf>,

    /// Recorded measurements answering for the platform, the geolocation
    /// service and the vantage point directory.
    #[arg(long)]
    fixture: PathBuf,

    #[arg(long)]
    gazetteer: Option<PathBuf>,

    /// Ground-truth airport code.
    #[arg(long)]
    gt_code: Option<String>,

    /// `cf-ray` header value carrying the ground-truth airport code.
    #[arg(long, conflicts_with = "gt_code")]
    cf_ray: Option<String>,

    #[arg(long, requires = "gt_country")]
    gt_city: Option<String>,

    #[arg(long, requires = "gt_city")]
    gt_country: Option<String>,

    /// Named refractive factor overriding the configured one.
    #[arg(long)]
    refractive_preset: Option<RefractivePreset>,

    /// Directory receiving the hunt record.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Print the record as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut cfg = match &args.config {
        Some(path) => HuntConfig::load(path)?,
        None => HuntConfig::default(),
    };
    if let Some(preset) = args.refractive_preset {
        cfg.refractive_preset = Some(preset);
    }
    let gazetteer = load_gazetteer(args.gazetteer.as_deref(), &cfg)?;
    let replay = Replay::new(ReplayFixture::load(&args.fixture)?);

    let source = traceroute_source(&args)?;
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| expand_tilde(&cfg.output_dir));

    println!("hunter running");
    println!("  target:     {}", args.target);
    match cfg.refractive_preset {
        Some(p) => println!("  factor:     {} ({p})", cfg.propagation().refractive_factor),
        None => println!("  factor:     {}", cfg.propagation().refractive_factor),
    }
    match &source {
        TracerouteSource::Platform { origin } => println!("  traceroute: platform from {origin}"),
        TracerouteSource::Host(hops) => println!("  traceroute: host ({} hops)", hops.len()),
    }
    println!("  gazetteer:  {} locations", gazetteer.len());
    println!("  output:     {}", output_dir.display());

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut controller = HuntController::new(&cfg, &gazetteer, replay.collaborators(), rng);
    let result = controller.run(args.target, source);

    let mut record = HuntRecord::new(result);
    match ground_truth(&args)? {
        Some(GroundTruth::Code(code)) => {
            record = record.with_ground_truth_code(&code, &gazetteer, cfg.validate_target_hop)
        }
        Some(GroundTruth::Info(gt)) => {
            record = record.with_ground_truth(gt, &gazetteer, cfg.validate_target_hop)
        }
        None => info!("no ground truth given, record left unclassified"),
    }
    let path = record.save(&output_dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    print_summary(&record, &path);
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn Error>> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_gazetteer(path: Option<&Path>, cfg: &HuntConfig) -> hunter_core::Result<Gazetteer> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| cfg.gazetteer_path.as_deref().map(expand_tilde));
    match path {
        Some(p) => Gazetteer::load(p),
        None => {
            warn!("no gazetteer configured, candidate resolution will find nothing");
            Ok(Gazetteer::default())
        }
    }
}

fn traceroute_source(args: &Args) -> hunter_core::Result<TracerouteSource> {
    if let Some(path) = &args.traceroute_output {
        let text = fs::read_to_string(path)?;
        return Ok(TracerouteSource::Host(parse_host_traceroute(&text)));
    }
    if args.host_traceroute {
        return Ok(TracerouteSource::Host(run_host_traceroute(args.target)?));
    }
    let (Some(lat), Some(lon)) = (args.origin_lat, args.origin_lon) else {
        return Err(HuntError::config(
            "--origin-lat and --origin-lon are required without a host traceroute",
        ));
    };
    Ok(TracerouteSource::Platform {
        origin: GeoPoint::new(lat, lon)?,
    })
}

fn run_host_traceroute(target: IpAddr) -> hunter_core::Result<Vec<hunter_core::Hop>> {
    info!(%target, "running system traceroute");
    let out = Command::new("traceroute").arg(target.to_string()).output()?;
    if !out.status.success() {
        return Err(HuntError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "traceroute exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        )));
    }
    Ok(parse_host_traceroute(&String::from_utf8_lossy(&out.stdout)))
}

#[derive(Debug, Clone, PartialEq)]
enum GroundTruth {
    Code(String),
    Info(GroundTruthInfo),
}

fn ground_truth(args: &Args) -> hunter_core::Result<Option<GroundTruth>> {
    if let Some(code) = &args.gt_code {
        return Ok(Some(GroundTruth::Code(code.clone())));
    }
    if let Some(header) = &args.cf_ray {
        let code = parse_cf_ray(header)
            .ok_or_else(|| HuntError::config(format!("cf-ray '{header}' carries no airport code")))?;
        return Ok(Some(GroundTruth::Code(code)));
    }
    match (&args.gt_city, &args.gt_country) {
        (Some(city), Some(country)) => Ok(Some(GroundTruth::Info(GroundTruthInfo {
            city: city.clone(),
            country_code: country.clone(),
        }))),
        _ => Ok(None),
    }
}

fn print_summary(record: &HuntRecord, path: &Path) {
    let r = &record.result;
    println!("\nHunt for {}:", r.target);
    match &r.last_hop {
        Some(hop) => {
            let loc = hop
                .geolocation
                .map_or_else(|| "not geolocated".to_string(), |p| p.to_string());
            println!("  last hop:   {} (hop {}, {})", hop.address, hop.index + 1, loc);
        }
        None => println!("  last hop:   none"),
    }
    println!(
        "  discs:      {} ({} usable), intersect={}",
        r.discs.len(),
        r.discs.valid().count(),
        r.discs_intersect
    );
    if let Some(c) = &r.centroid {
        println!("  centroid:   {c}");
    }
    println!("  countries:  {:?}", r.candidates.countries);
    println!("  cities:     {:?}", r.candidates.cities);
    if let Some(failure) = &r.failure {
        println!("  failed:     {}", failure.message);
    }
    for issue in &r.issues {
        println!("  issue:      {}", issue.message);
    }
    if let Some(o) = &record.outcomes {
        println!("  country:    {} ({})", o.country.label, o.country.reason);
        println!("  city:       {} ({})", o.city.label, o.city.reason);
    }
    println!("  record:     {}", path.display());
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TARGET: &str = "192.5.5.241";

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["hunter", "--target", TEST_TARGET, "--fixture", "f.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn platform_source_needs_origin() {
        assert!(traceroute_source(&parse(&[])).is_err());
        let args = parse(&["--origin-lat", "-33.9", "--origin-lon", "151.2"]);
        match traceroute_source(&args).unwrap() {
            TracerouteSource::Platform { origin } => assert_eq!(origin.latitude(), -33.9),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn ground_truth_from_cf_ray() {
        let args = parse(&["--cf-ray", "8a1b2c3d4e5f6789-cdg"]);
        assert_eq!(ground_truth(&args).unwrap(), Some(GroundTruth::Code("CDG".to_string())));
        assert!(ground_truth(&parse(&["--cf-ray", "nocode"])).is_err());
    }

    #[test]
    fn ground_truth_from_city_and_country() {
        let args = parse(&["--gt-city", "Paris", "--gt-country", "FR"]);
        assert_eq!(
            ground_truth(&args).unwrap(),
            Some(GroundTruth::Info(GroundTruthInfo {
                city: "Paris".to_string(),
                country_code: "FR".to_string(),
            }))
        );
        assert!(Args::try_parse_from([
            "hunter", "--target", TEST_TARGET, "--fixture", "f.json", "--gt-city", "Paris"
        ])
        .is_err());
    }

    #[test]
    fn refractive_preset_flag() {
        let args = parse(&["--refractive-preset", "km1000"]);
        assert_eq!(args.refractive_preset, Some(RefractivePreset::Km1000));
        assert!(Args::try_parse_from([
            "hunter", "--target", TEST_TARGET, "--fixture", "f.json", "--refractive-preset", "glass"
        ])
        .is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Ok(home) = env::var("HOME") {
            assert_eq!(expand_tilde("~/x"), PathBuf::from(home).join("x"));
        }
        assert_eq!(expand_tilde("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
