use chrono::{DateTime, Duration, TimeZone, Utc};
use coloc_sat::core::coloc::{
    ColocGenerator, ColocRequest, PairRow, PairRunOptions, PairStatus, ProductStatus, RowReport, RowSide, RowStatus,
    UniqueGranule,
};
use coloc_sat::core::merge::MergedProduct;
use coloc_sat::dataset::{Dataset, Variable};
use coloc_sat::io::acquisition::{Acquisition, AcquisitionFactory, AcquisitionRecord};
use coloc_sat::io::config::ColocConfig;
use coloc_sat::io::discovery::StaticDiscovery;
use coloc_sat::io::output::ProductSink;
use coloc_sat::types::{epoch_seconds, AcquisitionKind, ColocError, ColocResult};
use geo::{polygon, Polygon};
use ndarray::{Array1, Array2, Array3};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const SAR_PATH: &str = "/data/sar/S1A_IW_OWIH_CC_20210301T061000.nc";
const MODEL_PATH: &str = "/data/era5/ERA_5_20210301.nc";
const MISSING_PATH: &str = "/data/era5/ERA_5_20210302.nc";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 1, 6, 0, 0).unwrap()
}

fn axis(start: f64, step: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + step * i as f64).collect()
}

fn sar_level2() -> AcquisitionRecord {
    let lon = axis(2.0, 0.25, 9);
    let lat = axis(2.0, 0.25, 9);
    let wind = Array2::from_shape_fn((9, 9), |(i, _)| 10.0 + lat[i]);
    let time = Array2::from_elem((9, 9), epoch_seconds(&(t0() + Duration::minutes(10))));
    let dataset = Dataset::new()
        .with_coord("lon", Variable::from_vec("lon", lon))
        .with_coord("lat", Variable::from_vec("lat", lat))
        .with_var("wind_speed", Variable::from_array2(["lat", "lon"], wind))
        .with_var("time", Variable::from_array2(["lat", "lon"], time));
    AcquisitionRecord::new(
        "S1A_IW_OWIH_CC_20210301T061000.nc",
        "SAR",
        AcquisitionKind::TruncatedSwath,
        t0() + Duration::minutes(10),
        t0() + Duration::minutes(11),
    )
    .unwrap()
    .with_dataset(dataset)
}

fn era5() -> AcquisitionRecord {
    let wind = Array3::from_elem((2, 11, 11), 7.5);
    let times = Array1::from(vec![epoch_seconds(&t0()), epoch_seconds(&(t0() + Duration::hours(3)))]);
    let dataset = Dataset::new()
        .with_coord("lon", Variable::from_vec("lon", axis(0.0, 1.0, 11)))
        .with_coord("lat", Variable::from_vec("lat", axis(0.0, 1.0, 11)))
        .with_coord("time", Variable::new(&["time"], times.into_dyn()).unwrap())
        .with_var(
            "wind_speed",
            Variable::new(&["time", "lat", "lon"], wind.into_dyn()).unwrap(),
        );
    AcquisitionRecord::new(
        "ERA_5_20210301.nc",
        "ERA5",
        AcquisitionKind::ModelRegularGrid,
        t0(),
        t0() + Duration::hours(3),
    )
    .unwrap()
    .with_dataset(dataset)
}

/// SAR Level-1 product: footprint and dates only
fn sar_level1(name: &str, start: DateTime<Utc>) -> AcquisitionRecord {
    AcquisitionRecord::new(name, "SAR", AcquisitionKind::TruncatedSwath, start, start + Duration::seconds(30))
        .unwrap()
        .with_footprint(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)])
}

/// Opens acquisitions from an in-memory table
struct MapFactory {
    products: HashMap<PathBuf, AcquisitionRecord>,
}

impl MapFactory {
    fn new(products: Vec<(&str, AcquisitionRecord)>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|(path, record)| (PathBuf::from(path), record))
                .collect(),
        }
    }
}

impl AcquisitionFactory for MapFactory {
    fn open(&self, path: &Path) -> ColocResult<Box<dyn Acquisition>> {
        self.products
            .get(path)
            .cloned()
            .map(|record| Box::new(record) as Box<dyn Acquisition>)
            .ok_or_else(|| ColocError::NotFound(path.display().to_string()))
    }
}

/// Keeps the path and the variable names of every product it receives
#[derive(Clone, Default)]
struct RecordingSink {
    written: Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>,
}

impl ProductSink for RecordingSink {
    fn write(&self, product: &MergedProduct, path: &Path) -> ColocResult<()> {
        let names = product.dataset.data_vars.keys().cloned().collect();
        self.written.lock().unwrap().push((path.to_path_buf(), names));
        Ok(())
    }
}

#[test]
fn test_mission_search_with_listing_and_products() {
    init_logging();
    let destination = TempDir::new().unwrap();
    let factory = MapFactory::new(vec![(SAR_PATH, sar_level2()), (MODEL_PATH, era5())]);
    let sink = RecordingSink::default();
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory))
        .unwrap()
        .with_discovery(Box::new(StaticDiscovery::new([SAR_PATH, MODEL_PATH, MISSING_PATH])))
        .with_sink(Box::new(sink.clone()));

    let request = ColocRequest::builder(SAR_PATH)
        .mission("ERA5")
        .listing(true)
        .destination_folder(destination.path())
        .build()
        .unwrap();
    let summary = generator.run(&request).unwrap();

    // product 1 is never compared with itself
    assert_eq!(summary.reports.len(), 2);
    assert!(summary.has_coloc());
    assert_eq!(summary.colocated_files(), vec![Path::new(MODEL_PATH)]);

    let expected_product = destination
        .path()
        .join("sat_coloc_S1A_IW_OWIH_CC_20210301T061000__ERA_5_20210301.nc");
    let model_report = &summary.reports[0];
    match &model_report.status {
        PairStatus::Colocated { product, .. } => {
            assert_eq!(product, &ProductStatus::Written(expected_product.clone()));
        }
        other => panic!("expected a co-located pair, got {:?}", other),
    }
    assert!(matches!(summary.reports[1].status, PairStatus::Skipped(_)));

    let written = sink.written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, expected_product);
    assert!(written[0].1.contains(&"wind_speed_1".to_string()));
    assert!(written[0].1.contains(&"wind_speed_2".to_string()));
    drop(written);

    let listing = destination.path().join("listing_coloc_SAR_ERA5_60.txt");
    assert_eq!(model_report.listing.as_deref(), Some(listing.as_path()));
    let content = fs::read_to_string(&listing).unwrap();
    assert_eq!(content, format!("{}:{}\n", SAR_PATH, MODEL_PATH));

    // a second run must not duplicate the line
    generator.run(&request).unwrap();
    assert_eq!(fs::read_to_string(&listing).unwrap(), content);
}

#[test]
fn test_metadata_only_pair_is_listed_without_product() {
    init_logging();
    let destination = TempDir::new().unwrap();
    let first = "/data/sar/RS2_OK_20210301_A.SAFE";
    let second = "/data/sar/S1B_IW_GRDH_20210301_B.SAFE";
    let factory = MapFactory::new(vec![
        (first, sar_level1("RS2_OK_20210301_A.SAFE", t0())),
        (second, sar_level1("S1B_IW_GRDH_20210301_B.SAFE", t0() + Duration::minutes(20))),
    ]);
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory)).unwrap();

    let request = ColocRequest::builder(first)
        .product2(second)
        .listing(true)
        .listing_filename("pairs.txt")
        .destination_folder(destination.path())
        .build()
        .unwrap();
    let summary = generator.run(&request).unwrap();
    assert_eq!(summary.reports.len(), 1);
    match &summary.reports[0].status {
        PairStatus::Colocated { area_km2, product } => {
            assert!(area_km2.unwrap() > 1600.0);
            assert_eq!(product, &ProductStatus::Unavailable);
        }
        other => panic!("expected a co-located pair, got {:?}", other),
    }
    let content = fs::read_to_string(destination.path().join("pairs.txt")).unwrap();
    assert_eq!(content.lines().count(), 1);
}

#[test]
fn test_failures_are_reported_per_candidate() {
    init_logging();
    let far = "/data/sar/S1A_FAR.SAFE";
    let late = "/data/sar/S1A_LATE.SAFE";
    let first = "/data/sar/RS2_FIRST.SAFE";
    let factory = MapFactory::new(vec![
        (first, sar_level1("RS2_FIRST.SAFE", t0())),
        (
            far,
            sar_level1("S1A_FAR.SAFE", t0())
                .with_footprint(polygon![(x: 50.0, y: 50.0), (x: 51.0, y: 50.0), (x: 51.0, y: 51.0), (x: 50.0, y: 51.0)]),
        ),
        (late, sar_level1("S1A_LATE.SAFE", t0() + Duration::hours(5))),
    ]);
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory))
        .unwrap()
        .with_discovery(Box::new(StaticDiscovery::new([far, late, MISSING_PATH])));

    let request = ColocRequest::builder(first)
        .mission("SAR")
        .product_generation(false)
        .build()
        .unwrap();
    let summary = generator.run(&request).unwrap();
    assert!(!summary.has_coloc());
    assert_eq!(summary.reports[0].status, PairStatus::NotColocated);
    assert_eq!(summary.reports[1].status, PairStatus::NotColocated);
    assert!(matches!(summary.reports[2].status, PairStatus::Skipped(_)));
    assert!(summary.reports.iter().all(|report| report.listing.is_none()));
}

#[test]
fn test_fatal_errors() {
    init_logging();
    let factory = MapFactory::new(vec![(MODEL_PATH, era5())]);
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory)).unwrap();

    // mission search without a discovery collaborator
    let request = ColocRequest::builder(MODEL_PATH).mission("SMOS").build().unwrap();
    assert!(matches!(generator.run(&request), Err(ColocError::Config(_))));

    // unreadable product 1
    let request = ColocRequest::builder(MISSING_PATH).product2(MODEL_PATH).build().unwrap();
    assert!(matches!(generator.run(&request), Err(ColocError::NotFound(_))));

    let mut config = ColocConfig::default();
    config.minimal_area = serde_yaml::Value::from("10 hectares");
    let factory = MapFactory::new(Vec::new());
    assert!(ColocGenerator::new(config, Box::new(factory)).is_err());
}

fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
    polygon![
        (x: x0, y: y0),
        (x: x0 + side, y: y0),
        (x: x0 + side, y: y0 + side),
        (x: x0, y: y0 + side),
    ]
}

fn side(granule: &str, start: DateTime<Utc>, footprint: Polygon<f64>) -> RowSide {
    RowSide {
        mission: "SAR".to_string(),
        granule: granule.to_string(),
        start,
        stop: start + Duration::seconds(30),
        footprint,
    }
}

#[test]
fn test_pre_matched_rows() {
    init_logging();
    let destination = TempDir::new().unwrap();
    let files = [
        "/data/sar/RS2_OK_20210301_A.SAFE",
        "/data/sar/S1B_IW_GRDH_20210301_B.SAFE",
        "/data/sar/RS2_OK_20210301_C.SAFE",
        "/data/sar/S1A_IW_GRDH_20210301_D.SAFE",
    ];
    // every product footprint lies far away: only the row footprints can make pairs meet
    let far = square(50.0, 50.0, 1.0);
    let factory = MapFactory::new(
        files
            .iter()
            .map(|path| {
                let name = Path::new(path).file_name().unwrap().to_str().unwrap();
                (*path, sar_level1(name, t0()).with_footprint(far.clone()))
            })
            .collect(),
    );
    let sink = RecordingSink::default();
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory))
        .unwrap()
        .with_discovery(Box::new(StaticDiscovery::new(files)))
        .with_sink(Box::new(sink.clone()));

    let rows = vec![
        // ~3100 km2 in common
        PairRow {
            reference: side("RS2_OK_20210301_A.SAFE", t0(), square(0.0, 0.0, 1.0)),
            matched: side("S1B_IW_GRDH_20210301_B.SAFE", t0() + Duration::minutes(20), square(0.5, 0.5, 1.0)),
            destination_folder: None,
        },
        // same reference further away in time, dropped
        PairRow {
            reference: side("RS2_OK_20210301_A.SAFE", t0(), square(0.0, 0.0, 1.0)),
            matched: side("S1A_IW_GRDH_20210301_D.SAFE", t0() + Duration::minutes(50), square(0.0, 0.0, 1.0)),
            destination_folder: None,
        },
        PairRow {
            reference: side("RS2_OK_20210301_C.SAFE", t0(), square(10.0, 10.0, 1.0)),
            matched: side("S1A_IW_GRDH_20210301_D.SAFE", t0(), square(0.0, 0.0, 1.0)),
            destination_folder: None,
        },
        PairRow {
            reference: side("RS2_OK_20210301_E.SAFE", t0(), square(0.0, 0.0, 1.0)),
            matched: side("S1A_IW_GRDH_20210301_D.SAFE", t0(), square(0.0, 0.0, 1.0)),
            destination_folder: None,
        },
    ];
    let options = PairRunOptions {
        destination_folder: Some(destination.path().to_path_buf()),
        listing: true,
        unique: Some(UniqueGranule::Reference),
        ..PairRunOptions::default()
    };
    let reports = generator.run_pairs(rows, &options).unwrap();
    assert_eq!(reports.len(), 3);
    let report = |reference: &str| reports.iter().find(|r| r.reference == reference).unwrap();

    let met = report("RS2_OK_20210301_A.SAFE");
    assert_eq!(met.matched, "S1B_IW_GRDH_20210301_B.SAFE");
    match &met.status {
        RowStatus::Processed { product1, pair } => {
            assert_eq!(product1, Path::new(files[1]));
            assert_eq!(pair.candidate, Path::new(files[0]));
            match &pair.status {
                PairStatus::Colocated { area_km2, product } => {
                    assert!(area_km2.unwrap() > 1600.0);
                    assert_eq!(product, &ProductStatus::Unavailable);
                }
                other => panic!("expected a co-located pair, got {:?}", other),
            }
        }
        other => panic!("expected a processed row, got {:?}", other),
    }

    let apart = report("RS2_OK_20210301_C.SAFE");
    assert!(matches!(
        &apart.status,
        RowStatus::Processed { pair, .. } if pair.status == PairStatus::NotColocated
    ));

    let missing = report("RS2_OK_20210301_E.SAFE");
    assert_eq!(missing.status, RowStatus::MissingFile("RS2_OK_20210301_E.SAFE".to_string()));

    let status = |report: &RowReport| {
        fs::read_to_string(destination.path().join(report.status_filename())).unwrap()
    };
    assert_eq!(met.status_filename(), "coloc_S1B_IW_GRDH_20210301_B__RS2_OK_20210301_A.status");
    assert_eq!(status(met), "0");
    assert_eq!(status(apart), "0");
    assert_eq!(status(missing), "2");

    let listing = fs::read_to_string(destination.path().join("listing_coloc_SAR_SAR_60.txt")).unwrap();
    assert_eq!(listing, format!("{}:{}\n", files[1], files[0]));
    // metadata-only products are never handed to the sink
    assert!(sink.written.lock().unwrap().is_empty());
}

#[test]
fn test_pre_matched_rows_need_a_destination() {
    init_logging();
    let factory = MapFactory::new(Vec::new());
    let generator = ColocGenerator::new(ColocConfig::default(), Box::new(factory))
        .unwrap()
        .with_discovery(Box::new(StaticDiscovery::new(Vec::<PathBuf>::new())));
    let row = PairRow {
        reference: side("RS2_OK_20210301_A.SAFE", t0(), square(0.0, 0.0, 1.0)),
        matched: side("S1B_IW_GRDH_20210301_B.SAFE", t0(), square(0.0, 0.0, 1.0)),
        destination_folder: None,
    };
    let result = generator.run_pairs(vec![row], &PairRunOptions::default());
    assert!(matches!(result, Err(ColocError::Config(_))));
}
