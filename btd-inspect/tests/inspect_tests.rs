use btd_common::layout::{
    fab_path, fab_record_name, header_path, particle_path, particle_record_name, species_dir, write_json,
    write_segment, LAYOUT_VERSION,
};
use btd_common::{
    FabRecord, FieldSegment, IndexBox, LabParticle, ParticleBoxRecord, SegmentFormat, SnapshotHeader, SpeciesHeader,
};
use btd_inspect::{axis_profile, inspect_snapshot, species_dirs, write_profile_csv};
use indicatif::ProgressBar;
use std::path::Path;

// Two field segments along z ([2, 3] and [0, 1]) with rho = k, and one species.
fn write_snapshot(dir: &Path, declared_total: u64) {
    std::fs::create_dir_all(dir.join("Level_0")).unwrap();
    let mut fabs = Vec::new();
    for (ordinal, (lo, hi)) in [(2, 3), (0, 1)].into_iter().enumerate() {
        let b = IndexBox::new([0, 0, lo], [2, 2, hi]);
        let mut seg = FieldSegment::zeros(b, 1);
        for k in lo..=hi {
            for j in 0..3 {
                for i in 0..3 {
                    let n = seg.index(0, [i, j, k]);
                    seg.data[n] = k as f64;
                }
            }
        }
        write_segment(SegmentFormat::Bincode, &fab_path(dir, ordinal), &seg).unwrap();
        fabs.push(FabRecord {
            index_box: b,
            file: fab_record_name(ordinal),
            min: vec![lo as f64],
            max: vec![hi as f64],
        });
    }
    let header = SnapshotHeader {
        version: LAYOUT_VERSION,
        var_names: vec!["rho".to_string()],
        time: 1.0e-9,
        step: 12,
        prob_lo: [0.0, 0.0, 10.0],
        prob_hi: [3.0, 3.0, 12.0],
        domain: IndexBox::new([0, 0, 0], [2, 2, 3]),
        cell_size: [1.0, 1.0, 0.5],
        segment_format: SegmentFormat::Bincode,
        complete: true,
        fabs,
    };
    write_json(&header_path(dir), &header).unwrap();

    let sp_dir = species_dir(dir, "electrons");
    std::fs::create_dir_all(sp_dir.join("Level_0")).unwrap();
    let particle = LabParticle { x: 1.0, y: 1.0, z: 11.0, ux: 0.0, uy: 0.0, uz: 0.0, w: 1.0 };
    write_segment(SegmentFormat::Bincode, &particle_path(dir, "electrons", 0), &vec![particle; 3]).unwrap();
    let species = SpeciesHeader {
        species: "electrons".to_string(),
        component_names: LabParticle::COMPONENT_NAMES.iter().map(|s| s.to_string()).collect(),
        total_particles: declared_total,
        boxes: vec![
            ParticleBoxRecord {
                index_box: IndexBox::new([0, 0, 1], [2, 2, 4]),
                data_index: 0,
                count: 3,
                offset: 0,
                file: Some(particle_record_name(0)),
            },
            ParticleBoxRecord {
                index_box: IndexBox::new([0, 0, -1], [2, 2, 2]),
                data_index: 1,
                count: 0,
                offset: 3,
                file: None,
            },
        ],
    };
    write_json(&header_path(&sp_dir), &species).unwrap();
}

#[test]
fn consistent_snapshot_passes() {
    let tmp = tempfile::tempdir().unwrap();
    write_snapshot(tmp.path(), 3);
    let report = inspect_snapshot(tmp.path(), &ProgressBar::hidden()).unwrap();
    assert!(report.is_consistent(), "{:?}", report.problems);
    assert_eq!(report.covered_z_cells(), 4);
    assert_eq!(report.species.len(), 1);
    assert_eq!(species_dirs(tmp.path()).unwrap().len(), 1);
}

#[test]
fn wrong_particle_total_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_snapshot(tmp.path(), 5);
    let report = inspect_snapshot(tmp.path(), &ProgressBar::hidden()).unwrap();
    assert_eq!(report.problems.len(), 1);
    assert!(report.problems[0].contains("per-box sum"));
}

#[test]
fn missing_segment_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_snapshot(tmp.path(), 3);
    std::fs::remove_file(fab_path(tmp.path(), 1)).unwrap();
    let report = inspect_snapshot(tmp.path(), &ProgressBar::hidden()).unwrap();
    assert!(!report.is_consistent());
    assert!(report.problems.iter().any(|p| p.contains("Cell_D_00001")));
}

#[test]
fn profile_is_sorted_along_z() {
    let tmp = tempfile::tempdir().unwrap();
    write_snapshot(tmp.path(), 3);
    let report = inspect_snapshot(tmp.path(), &ProgressBar::hidden()).unwrap();
    let rows = axis_profile(tmp.path(), &report.header, "rho").unwrap();
    let values: Vec<f64> = rows.iter().map(|r| r.1).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    assert!((rows[0].0 - 10.25).abs() < 1e-12);
    assert!(axis_profile(tmp.path(), &report.header, "Ex").is_err());

    let out = tmp.path().join("profile.csv");
    write_profile_csv(&out, "rho", &rows).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.starts_with("z_m,rho"));
    assert_eq!(text.lines().count(), 5);
}
