//! End-to-end runs of the analyzer over small hand-built landscapes.

use approx::assert_abs_diff_eq;
use geo::{coord, Coord, Geometry, LineString, Point, Polygon, Rect};
use ogma_core::{
    AnalysisConfig, AnalysisReport, AssessmentStatus, Attributes, CategoryTarget, Crs, CrsResolutionPolicy,
    OgmaAnalyzer, Projection, ReferenceFeature, ReferenceLayer, Target, COMPOSITE_SEPARATOR,
};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
    Geometry::Rect(Rect::new((x0, y0), (x1, y1)))
}

fn feature(id: &str, category: &str, geometry: Geometry<f64>) -> ReferenceFeature {
    ReferenceFeature::new(id, Attributes::new().with("category", category), geometry)
}

/// Old growth over x 0–6, non-forest over x 6–9, nothing over x 9–10.
fn cover() -> ReferenceLayer {
    ReferenceLayer::new("cover", Crs::BC_ALBERS)
        .with_feature(feature("f1", "old_growth", rect(0.0, 0.0, 6.0, 10.0)))
        .with_feature(feature("f2", "non_forest", rect(6.0, 0.0, 9.0, 10.0)))
}

fn square(id: &str) -> Target {
    Target::new(id, Crs::BC_ALBERS, rect(0.0, 0.0, 10.0, 10.0))
}

fn run(config: AnalysisConfig, targets: &[Target], layers: &[ReferenceLayer]) -> AnalysisReport {
    OgmaAnalyzer::new(config).unwrap().run(targets, layers, &[])
}

fn percent_total(report: &AnalysisReport, target: &str, layer: &str) -> f64 {
    let record = report.record(target, layer).unwrap();
    record.categories().iter().map(|c| c.percent).sum::<f64>() + record.unclassified_percent()
}

#[test]
fn hundred_square_metre_target() {
    let report = run(AnalysisConfig::default(), &[square("ogma-1")], &[cover()]);
    assert!(report.failures.is_empty());
    let record = report.record("ogma-1", "cover").unwrap();

    assert_abs_diff_eq!(record.total_area(), 100.0, epsilon = 1e-9);
    assert_eq!(record.categories().len(), 2);
    assert_eq!(record.categories()[0].category, "old_growth");
    assert_abs_diff_eq!(record.categories()[0].area, 60.0, epsilon = 1e-9);
    assert_abs_diff_eq!(record.categories()[0].percent, 60.0, epsilon = 1e-9);
    assert_eq!(record.categories()[1].category, "non_forest");
    assert_abs_diff_eq!(record.categories()[1].percent, 30.0, epsilon = 1e-9);
    assert_abs_diff_eq!(record.unclassified_area(), 10.0, epsilon = 1e-9);
    assert_abs_diff_eq!(record.unclassified_percent(), 10.0, epsilon = 1e-9);
}

#[test]
fn category_areas_never_exceed_target() {
    let targets = vec![
        square("a"),
        Target::new("b", Crs::BC_ALBERS, rect(2.5, 1.0, 7.5, 4.0)),
        Target::new("c", Crs::BC_ALBERS, rect(8.0, 8.0, 12.0, 12.0)),
    ];
    let report = run(AnalysisConfig::default(), &targets, &[cover()]);
    assert!(report.failures.is_empty());
    for record in &report.records {
        let covered: f64 = record.categories().iter().map(|c| c.area).sum();
        assert!(covered <= record.total_area() * (1.0 + 1e-4));
        assert!(record.categories().iter().all(|c| c.area > 0.0));
        assert_abs_diff_eq!(covered + record.unclassified_area(), record.total_area(), epsilon = 1e-6);
        assert_abs_diff_eq!(percent_total(&report, record.target_id(), "cover"), 100.0, epsilon = 1e-6);
    }
}

#[test]
fn non_overlapping_and_touching_features_are_absent() {
    let layer = cover()
        .with_feature(feature("far", "mature", rect(100.0, 100.0, 110.0, 110.0)))
        .with_feature(feature("edge", "early_seral", rect(10.0, 0.0, 20.0, 10.0)));
    let report = run(AnalysisConfig::default(), &[square("a")], &[layer]);
    let record = report.record("a", "cover").unwrap();
    assert!(record.category("mature").is_none());
    assert!(record.category("early_seral").is_none());
    assert_eq!(record.eliminated_slivers(), 0);
}

#[test]
fn overlapping_reference_features_overrun_the_target() {
    let layer = cover().with_feature(feature("f3", "non_forest", rect(7.0, 0.0, 9.0, 10.0)));
    let report = run(AnalysisConfig::default(), &[square("a"), square("b")], &[layer]);
    assert!(report.records.is_empty());
    assert_eq!(report.failures.len(), 2);
    let failure = report.failure_for("a").unwrap();
    assert_eq!(failure.kind, "area_overrun");
    assert_eq!(failure.layer_id.as_deref(), Some("cover"));
}

/// A ring that runs around the square and then back along its own edges.
fn retraced_square() -> Geometry<f64> {
    let ring = LineString::from(vec![
        (0.0, 0.0),
        (10.0, 0.0),
        (10.0, 10.0),
        (0.0, 10.0),
        (0.0, 0.0),
        (0.0, 10.0),
        (10.0, 10.0),
        (10.0, 0.0),
    ]);
    Geometry::Polygon(Polygon::new(ring, vec![]))
}

#[test]
fn one_bad_target_does_not_stop_the_others() {
    let targets = vec![
        square("first"),
        Target::new("point", Crs::BC_ALBERS, Geometry::Point(Point::new(5.0, 5.0))),
        Target::new("retraced", Crs::BC_ALBERS, retraced_square()),
        square("last"),
    ];
    let report = run(AnalysisConfig::default(), &targets, &[cover()]);
    let ids: Vec<&str> = report.records.iter().map(|r| r.target_id()).collect();
    assert_eq!(ids, vec!["first", "last"]);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failure_for("point").unwrap().kind, "invalid_geometry");
    assert_eq!(report.failure_for("retraced").unwrap().kind, "invalid_geometry");
    assert_abs_diff_eq!(
        report.record("last", "cover").unwrap().category("old_growth").unwrap().percent,
        60.0,
        epsilon = 1e-9
    );
}

#[test]
fn hole_outside_its_shell_does_not_inflate_coverage() {
    let shell = Rect::new((0.0, 0.0), (10.0, 10.0)).to_polygon();
    let stray_hole = Rect::new((20.0, 20.0), (24.0, 24.0)).to_polygon();
    let target = Target::new(
        "stray-hole",
        Crs::BC_ALBERS,
        Polygon::new(shell.exterior().clone(), vec![stray_hole.exterior().clone()]),
    );
    let layer = ReferenceLayer::new("cover", Crs::BC_ALBERS)
        .with_feature(feature("all", "old_growth", rect(-50.0, -50.0, 50.0, 50.0)));

    let report = run(AnalysisConfig::default(), &[target], &[layer]);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let record = report.record("stray-hole", "cover").unwrap();
    assert_abs_diff_eq!(record.total_area(), 100.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.category("old_growth").unwrap().area, 100.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.unclassified_area(), 0.0, epsilon = 1e-6);
}

#[test]
fn eliminated_slivers_keep_their_area_in_the_composition() {
    let layer = ReferenceLayer::new("cover", Crs::BC_ALBERS)
        .with_feature(feature("f1", "old_growth", rect(0.0, 0.0, 6.0, 10.0)))
        .with_feature(feature("f2", "non_forest", rect(6.0, 0.0, 9.95, 10.0)))
        .with_feature(feature("thin", "mature", rect(9.95, 0.0, 10.0, 10.0)));
    let target = [square("a")];

    let kept = run(AnalysisConfig::default(), &target, std::slice::from_ref(&layer));
    let merged = run(AnalysisConfig::default().with_sliver_area(1.0), &target, &[layer]);

    let classified = |report: &AnalysisReport| -> f64 {
        report.record("a", "cover").unwrap().categories().iter().map(|c| c.area).sum()
    };
    assert_abs_diff_eq!(classified(&kept), classified(&merged), epsilon = 1e-6);

    let record = merged.record("a", "cover").unwrap();
    assert!(record.category("mature").is_none());
    assert_eq!(record.eliminated_slivers(), 1);
    assert_abs_diff_eq!(record.category("old_growth").unwrap().area, 60.5, epsilon = 1e-6);
    assert_abs_diff_eq!(record.unclassified_area(), 0.0, epsilon = 1e-6);
}

#[test]
fn composite_keys_break_down_by_several_attributes() {
    let vri = ReferenceLayer::new("vri", Crs::BC_ALBERS)
        .with_feature(ReferenceFeature::new(
            "p1",
            Attributes::new().with("LEVEL", "old").with("BEC_ZONE", "CWH"),
            rect(0.0, 0.0, 5.0, 10.0),
        ))
        .with_feature(ReferenceFeature::new(
            "p2",
            Attributes::new().with("LEVEL", "mature").with("BEC_ZONE", "CWH"),
            rect(5.0, 0.0, 10.0, 10.0),
        ));
    let config = AnalysisConfig::default().with_layer_category_attribute("vri", vec!["LEVEL", "BEC_ZONE"]);
    let report = run(config, &[square("a")], &[vri]);
    let record = report.record("a", "vri").unwrap();
    let old_cwh = format!("old{COMPOSITE_SEPARATOR}CWH");
    assert_abs_diff_eq!(record.category(&old_cwh).unwrap().percent, 50.0, epsilon = 1e-9);
    assert!(record.category("mature / CWH").is_some());
}

#[test]
fn repeated_runs_are_identical() {
    let targets: Vec<Target> = (0..8)
        .map(|i| {
            let x = i as f64;
            Target::new(format!("t{i}"), Crs::BC_ALBERS, rect(x, 0.0, x + 3.0, 5.0))
        })
        .collect();
    let analyzer = OgmaAnalyzer::new(AnalysisConfig::default()).unwrap();
    let first = analyzer.run(&targets, &[cover()], &[]);
    let second = analyzer.run(&targets, &[cover()], &[]);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn exclusions_are_erased_before_tallying() {
    let parks = ReferenceLayer::new("parks", Crs::BC_ALBERS).with_feature(ReferenceFeature::new(
        "p1",
        Attributes::new(),
        rect(0.0, 0.0, 3.0, 10.0),
    ));
    let report = OgmaAnalyzer::new(AnalysisConfig::default())
        .unwrap()
        .run(&[square("a")], &[cover()], &[parks]);
    let record = report.record("a", "cover").unwrap();
    assert_abs_diff_eq!(record.gross_area(), 100.0, epsilon = 1e-9);
    assert_abs_diff_eq!(record.excluded_area(), 30.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.total_area(), 70.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.category("old_growth").unwrap().area, 30.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.category("non_forest").unwrap().area, 30.0, epsilon = 1e-6);
    assert_abs_diff_eq!(record.unclassified_area(), 10.0, epsilon = 1e-6);
}

#[test]
fn geographic_layer_is_reprojected_into_albers() {
    let albers = Projection::from_epsg(3005).unwrap();
    let centre: Coord<f64> = albers.from_geographic(coord! { x: -123.0, y: 49.2 }).unwrap();
    let target = Target::new(
        "ogma-bc",
        Crs::BC_ALBERS,
        rect(centre.x - 500.0, centre.y - 500.0, centre.x + 500.0, centre.y + 500.0),
    );

    // Split along the -123° meridian, which is a straight line through the
    // target centre in Albers.
    let layer = ReferenceLayer::new("vri", Crs::WGS84)
        .with_feature(feature("west", "old_growth", rect(-124.0, 48.5, -123.0, 50.0)))
        .with_feature(feature("east", "mature", rect(-123.0, 48.5, -122.0, 50.0)));

    let report = run(AnalysisConfig::default(), &[target], &[layer]);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let record = report.record("ogma-bc", "vri").unwrap();
    assert_eq!(record.crs(), Crs::BC_ALBERS);
    assert_abs_diff_eq!(record.total_area(), 1_000_000.0, epsilon = 1e-3);
    assert_abs_diff_eq!(record.category("old_growth").unwrap().percent, 50.0, epsilon = 1e-3);
    assert_abs_diff_eq!(record.category("mature").unwrap().percent, 50.0, epsilon = 1e-3);
    assert_abs_diff_eq!(record.unclassified_percent(), 0.0, epsilon = 1e-3);
    assert_eq!(record.hectares(record.total_area()).map(|ha| ha.round()), Some(100.0));
}

#[test]
fn undefined_frames_run_only_when_assumed() {
    let layer = ReferenceLayer::new("cover", Crs::Undefined)
        .with_feature(feature("f1", "old_growth", rect(0.0, 0.0, 10.0, 10.0)));
    let target = Target::new("a", Crs::Undefined, rect(0.0, 0.0, 10.0, 10.0));

    let strict = run(AnalysisConfig::default(), std::slice::from_ref(&target), std::slice::from_ref(&layer));
    assert_eq!(strict.failure_for("a").unwrap().kind, "incompatible_crs");

    let assumed = run(
        AnalysisConfig::default().with_crs_policy(CrsResolutionPolicy::AssumeTargetCrs),
        &[target],
        &[layer],
    );
    let record = assumed.record("a", "cover").unwrap();
    assert_abs_diff_eq!(record.category("old_growth").unwrap().percent, 100.0, epsilon = 1e-9);
    assert_eq!(record.hectares(record.total_area()), None);
}

#[test]
fn per_layer_attributes_and_targets() {
    let ownership = ReferenceLayer::new("ownership", Crs::BC_ALBERS)
        .with_feature(ReferenceFeature::new(
            "crown",
            Attributes::new().with("OWNER_TYPE", "Crown Provincial"),
            rect(0.0, 0.0, 10.0, 8.0),
        ))
        .with_feature(ReferenceFeature::new(
            "unknown-owner",
            Attributes::new(),
            rect(0.0, 8.0, 10.0, 10.0),
        ));
    let config = AnalysisConfig::from_json_str(
        r#"{
            "layer_category_attributes": {"ownership": "OWNER_TYPE"},
            "category_targets": {"old_growth": {"min_fraction": 0.7}}
        }"#,
    )
    .unwrap();
    let report = run(config, &[square("a")], &[cover(), ownership]);

    let owners = report.record("a", "ownership").unwrap();
    assert_abs_diff_eq!(owners.category("Crown Provincial").unwrap().percent, 80.0, epsilon = 1e-9);
    assert_abs_diff_eq!(owners.category("unknown").unwrap().percent, 20.0, epsilon = 1e-9);

    let cover_record = report.record("a", "cover").unwrap();
    let assessment = &cover_record.assessments()[0];
    assert_eq!(assessment.category, "old_growth");
    assert_eq!(assessment.status, AssessmentStatus::Deficit);
    assert_abs_diff_eq!(assessment.surplus, -10.0, epsilon = 1e-9);
    assert_eq!(
        AnalysisConfig::default()
            .with_category_target("old_growth", CategoryTarget::at_least(0.5))
            .category_targets
            .len(),
        1
    );
}

#[test]
fn report_serializes_crs_as_epsg_code() {
    let report = run(AnalysisConfig::default(), &[square("a")], &[cover()]);
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["records"][0]["crs"], 3005);
    assert_eq!(json["records"][0]["target_id"], "a");
}
