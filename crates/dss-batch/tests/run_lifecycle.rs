//! End-to-end run lifecycle against the scripted simulator: dispatch,
//! manifest round-trip, progress discipline, and temp-file hygiene.

use dss_batch::{CalcRunner, InputBundle};
use dss_core::{CalcResults, CancelToken, DynVerdict, ProgressSink, Settings};
use dss_io::load_results_manifest;
use dss_sim::tables::{col, object_class, SCN_ACTIONS, SECTION};
use dss_sim::testing::{ScriptedSim, SimState, SnapshotStore};
use dss_sim::{SimFacade, SimFactory, SimResult};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

/// The case rides out a bus fault of up to 0.3 s.
fn crt_factory() -> Rc<dyn SimFactory> {
    let factory = move || -> SimResult<Box<dyn SimFacade>> {
        let sim = ScriptedSim::new();
        sim.seed_action(object_class::NODE, "x", 17, "5.0");
        sim.seed_action(object_class::BRANCH, "", 0, "");
        sim.on_dynamic(|state: &mut SimState, _, _| {
            let row = state.find_row(SCN_ACTIONS, "ObjectClass = node").unwrap();
            let dt = state.cell_f64(SCN_ACTIONS, row, col::DT).unwrap();
            Ok(DynVerdict {
                success: true,
                stable: dt <= 0.3,
                message: " - ".into(),
                time_reached: 1.0 + dt,
            })
        });
        Ok(Box::new(sim))
    };
    Rc::new(factory)
}

fn recording_progress() -> (ProgressSink, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink = ProgressSink::new(move |v| sink_seen.lock().unwrap().push(v));
    (sink, seen)
}

#[test]
fn crt_time_run_round_trips_through_the_manifest() {
    let root = tempfile::tempdir().unwrap();
    let mut bundle = InputBundle::new();
    bundle.add_regime("зима макс.rg2");
    bundle.add_regime("лето мин.rg2");
    bundle.add_scenario("КЗ на ВЛ 500.scn");

    let runner = CalcRunner::new(crt_factory(), bundle, Settings::default(), root.path());
    let (mut progress, seen) = recording_progress();
    let outcome = runner
        .run_crt_time(&mut progress, &CancelToken::new())
        .unwrap();

    // the run directory is labelled and holds the manifest
    assert!(outcome
        .run_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("Предельное время КЗ"));
    assert!(outcome.manifest_path.exists());

    let manifest = load_results_manifest(&outcome.manifest_path).unwrap();
    assert_eq!(manifest.calculation, "Предельное время КЗ");
    let CalcResults::CrtTime(reports) = manifest.results else {
        panic!("wrong calculation in manifest");
    };
    assert_eq!(reports.len(), 2);
    for report in &reports {
        let time = &report.schemas[0].times[0];
        assert!(time.crt_time <= 0.3 && time.crt_time >= 0.3 - 2.0 * 0.02);
    }

    // progress: monotone, final value within the declared maximum
    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(*seen.last().unwrap() <= outcome.declared_steps);
    assert_eq!(*seen.last().unwrap(), 2);
}

/// One MW per coefficient unit, stable up to 800 MW.
fn mdp_factory(store: SnapshotStore) -> Rc<dyn SimFactory> {
    let factory = move || -> SimResult<Box<dyn SimFacade>> {
        let sim = ScriptedSim::new().with_snapshot_store(store.clone());
        sim.seed_section(1, "Сечение 1", 500.0, true);
        sim.on_run_ut(|state: &mut SimState| {
            state.set_cell(SECTION, 0, col::PSECH, 1000.0.into());
            state.set_sum_kfc(500.0);
            Ok(500.0)
        });
        sim.on_step(|state: &mut SimState, coefficient, _| {
            let flow = state.cell_f64(SECTION, 0, col::PSECH).unwrap();
            state.set_cell(SECTION, 0, col::PSECH, (flow + coefficient).into());
            state.set_sum_kfc(coefficient);
            Ok(coefficient)
        });
        sim.on_dynamic(|state: &mut SimState, _, _| {
            let flow = state.cell_f64(SECTION, 0, col::PSECH).unwrap();
            Ok(DynVerdict {
                success: true,
                stable: flow <= 800.0,
                message: " - ".into(),
                time_reached: 5.0,
            })
        });
        Ok(Box::new(sim))
    };
    Rc::new(factory)
}

#[test]
fn mdp_run_leaves_no_simulator_temporaries() {
    let root = tempfile::tempdir().unwrap();
    let store = ScriptedSim::snapshot_store();
    let mut bundle = InputBundle::new();
    bundle.add_regime("зима.rg2");
    bundle.add_scenario("КЗ-1.scn");
    bundle.set_ut_file("траектория.ut2");
    bundle.sechen_file = Some("сечения.sch".into());

    let runner = CalcRunner::new(
        mdp_factory(store),
        bundle,
        Settings::default(),
        root.path(),
    );
    let (mut progress, _seen) = recording_progress();
    let outcome = runner.run_mdp(&mut progress, &CancelToken::new()).unwrap();

    let CalcResults::Mdp(reports) = &outcome.results else {
        panic!("wrong calculation");
    };
    let mdp = reports[0].schemas[0].events[0].no_pa_mdp.value().unwrap();
    assert!((mdp - 800.0).abs() <= 10.0, "mdp = {mdp}");

    // no *.rst / *.scn residue after the run
    assert!(no_temp_files(&outcome.run_dir));
    assert!(outcome.manifest_path.exists());
}

fn no_temp_files(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().flatten().all(|entry| {
        let path = entry.path();
        !matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("rst") | Some("scn")
        )
    })
}

#[test]
fn cancelled_run_still_produces_a_manifest() {
    let root = tempfile::tempdir().unwrap();
    let mut bundle = InputBundle::new();
    bundle.add_regime("а.rg2");
    bundle.add_regime("б.rg2");
    bundle.add_scenario("КЗ.scn");

    let cancel = CancelToken::new();
    cancel.cancel();
    let runner = CalcRunner::new(crt_factory(), bundle, Settings::default(), root.path());
    let (mut progress, _) = recording_progress();
    let outcome = runner.run_crt_time(&mut progress, &cancel).unwrap();

    let CalcResults::CrtTime(reports) = &outcome.results else {
        panic!("wrong calculation");
    };
    assert!(reports.is_empty(), "cancelled before the first triple");
    assert!(outcome.manifest_path.exists());
}
