//! Demo: record a synthetic run and merge it into a campaign archive
//!
//! Builds a small working directory with one BP-style dataset and one
//! HDF5-style file, writes the local run record an instrumented run would
//! leave behind, then creates an archive from it. No simulation needed.
//!
//! Usage:
//!   cargo run --example record_and_merge
//!
//! Then try:
//!   campaign-manager list -s ./campaign-demo/store
//!   campaign-manager info -s ./campaign-demo/store demo -v

use campaign_manager::archive::StepRow;
use campaign_manager::commands::{self, Command};
use campaign_manager::local::LocalRecorder;
use campaign_manager::{timefmt, Settings, LOCAL_CAMPAIGN_DIR};
use std::fs;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let root = PathBuf::from("./campaign-demo");
    let work = root.join("run");
    let store = root.join("store");
    fs::create_dir_all(&store)?;

    println!("Creating demo run in {:?}\n", work);

    // --- A BP-style dataset: index, metadata, one data segment ---
    let bp = work.join("heat.bp");
    fs::create_dir_all(&bp)?;
    let mut header = vec![0u8; 64];
    let text = b"ADIOS-BP v2.10.0 Index Table";
    header[..text.len()].copy_from_slice(text);
    header[32..35].copy_from_slice(b"210");
    header[37] = 5;
    fs::write(bp.join("md.idx"), &header)?;
    fs::write(bp.join("md.0"), "temperature pressure ".repeat(500))?;
    fs::write(bp.join("data.0"), vec![0u8; 4096])?;
    fs::write(bp.join("profiling.json"), r#"[{"rank": 0, "transport_0": {"wbytes": 4096}}]"#)?;

    // --- An HDF5-style file ---
    let mut h5 = vec![137, 72, 68, 70, 13, 10, 26, 10];
    h5.extend_from_slice(&[0u8; 256]);
    fs::write(work.join("mesh.h5"), h5)?;

    // --- The local run record ---
    let record = LocalRecorder::open(&work.join(LOCAL_CAMPAIGN_DIR).join("heat-rank0.acr"))?;
    let heat = record.add_dataset("heat.bp", 0)?;
    let mesh = record.add_dataset("mesh.h5", 0)?;
    for step in 0..5 {
        record.add_step(
            heat,
            &StepRow {
                engine_step: step,
                phys_step: step * 100,
                phys_time: step as f64 * 0.01,
                ctime: timefmt::now_micros(),
            },
        )?;
    }
    record.add_step(
        mesh,
        &StepRow { engine_step: 0, phys_step: 0, phys_time: 0.0, ctime: timefmt::now_micros() },
    )?;
    drop(record);

    // --- Merge ---
    let settings = Settings {
        store_root: Some(store.clone()),
        working_dir: work.clone(),
        hostname: Some("demohost".to_string()),
        verbose: 1,
        ..Settings::default()
    };

    let archive = store.join("demo.aca");
    if archive.exists() {
        commands::run(Command::Update, Some("demo"), &settings, &mut std::io::sink())?;
        println!("Demo archive updated: {:?}\n", archive);
    } else {
        commands::run(Command::Create, Some("demo"), &settings, &mut std::io::sink())?;
        println!("Demo archive created: {:?}\n", archive);
    }

    let mut stdout = std::io::stdout();
    commands::run(Command::Info, Some("demo"), &settings, &mut stdout)?;

    println!("\nTry these commands:\n");
    println!("  campaign-manager list -s {}", store.display());
    println!("  campaign-manager info -s {} demo -v", store.display());

    Ok(())
}
