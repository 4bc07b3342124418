//! Integration tests for btd-common.

use btd_common::layout::{self, SegmentFormat};
use btd_common::{BtdConfig, FieldKind, FieldSegment, IndexBox, MergeStrategy};
use std::io::Write;

const FULL_CONFIG: &str = r#"
[boost]
gamma = 10.0

[moving_window]
v = 1.0

[domain]
prob_lo = [-2.0e-5, -2.0e-5, -4.0e-5]
prob_hi = [2.0e-5, 2.0e-5, 0.0]
n_cell = [4, 4, 128]
dt = 1.0e-15

[diag]
file_prefix = "out/lab"
num_snapshots_lab = 4
dt_snapshots_lab = 2.0e-13
buffer_size = 32
fields_to_plot = ["Ex", "By", "rho"]
segment_format = "messagepack"
merge_strategy = "copy"

[run]
max_step = 400
seed = 7

[[run.species]]
name = "electrons"
num_particles = 1000
z_min = -3.0e-5
z_max = -1.0e-5

[[run.species]]
name = "ions"
num_particles = 10
z_min = -3.0e-5
z_max = -1.0e-5
"#;

// ─── Config Tests ─────────────────────────────────────────────

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::File::create(&path).unwrap().write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = BtdConfig::load(&path).unwrap();
    let params = config.get_btd_params().unwrap();
    assert_eq!(params.num_snapshots_lab, 4);
    assert_eq!(params.buffer_size, 32);
    assert_eq!(params.dt_boost, 1.0e-15);
    assert_eq!(params.segment_format, SegmentFormat::MessagePack);
    assert_eq!(params.merge_strategy, MergeStrategy::Copy);
    assert_eq!(params.fields.var_names(), vec!["Ex", "By", "rho"]);
    // No explicit selection: every species is written.
    assert_eq!(params.species, vec!["electrons".to_string(), "ions".to_string()]);
}

#[test]
fn explicit_species_selection() {
    let text = FULL_CONFIG.replace("merge_strategy = \"copy\"", "merge_strategy = \"copy\"\nspecies = [\"ions\"]");
    let config = BtdConfig::from_toml_str(&text).unwrap();
    assert_eq!(config.output_species(), vec!["ions".to_string()]);
}

#[test]
fn unknown_species_selection_fails() {
    let text = FULL_CONFIG.replace("merge_strategy = \"copy\"", "merge_strategy = \"copy\"\nspecies = [\"positrons\"]");
    assert!(BtdConfig::from_toml_str(&text).is_err());
}

#[test]
fn write_species_off_disables_particles() {
    let text = FULL_CONFIG.replace("merge_strategy = \"copy\"", "merge_strategy = \"copy\"\nwrite_species = false");
    let params = BtdConfig::from_toml_str(&text).unwrap().get_btd_params().unwrap();
    assert!(!params.do_particles());
}

#[test]
fn missing_file_reports_path() {
    let err = BtdConfig::load("/nonexistent/config.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/config.toml"));
}

// ─── Layout Tests ─────────────────────────────────────────────

#[test]
fn field_segment_survives_disk() {
    let dir = tempfile::tempdir().unwrap();
    let b = IndexBox::new([0, 0, 0], [1, 1, 2]);
    let mut seg = FieldSegment::zeros(b, FieldKind::NCOMP);
    for (i, v) in seg.data.iter_mut().enumerate() {
        *v = i as f64 * 0.5;
    }
    let path = dir.path().join(layout::fab_file_name(0));
    layout::write_segment(SegmentFormat::Bincode, &path, &seg).unwrap();
    let back = layout::read_field_segment(SegmentFormat::Bincode, &path).unwrap();
    assert_eq!(back.index_box, b);
    assert_eq!(back.data.len(), 12 * FieldKind::NCOMP);
    assert_eq!(back.get(1, [0, 0, 0]), seg.get(1, [0, 0, 0]));
}
