//! Supervision-tree end-to-end scenarios against the public API.
//!
//! Run with: `cargo test --test e2e_supervision`

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use arbor::{actor, process, supervisor, system, Next, Reply, StartError, Subject};
use arbor::{test_complete, test_phase, test_section};

fn init_test(name: &str) {
    arbor::test_utils::init_test_logging();
    test_phase!(name);
}

#[derive(Debug)]
enum Worker {
    Whoami(Reply<&'static str>),
}

type Registry = Arc<Mutex<Vec<(&'static str, Subject<Worker>)>>>;

fn named_worker(
    name: &'static str,
    registry: Registry,
) -> supervisor::ChildSpec<Worker, (), ()> {
    supervisor::worker(move |()| {
        let subject = actor::start((), move |Worker::Whoami(reply), ()| {
            reply.send(name);
            Next::Continue(())
        })?;
        registry.lock().push((name, subject.clone()));
        Ok(subject)
    })
}

fn latest(registry: &Registry, name: &str) -> Subject<Worker> {
    registry
        .lock()
        .iter()
        .rev()
        .find(|(n, _)| *n == name)
        .map(|(_, s)| s.clone())
        .expect("worker started")
}

#[test]
fn a_tree_survives_a_middle_child_crash() {
    init_test("a_tree_survives_a_middle_child_crash");

    let registry: Registry = Arc::new(Mutex::new(Vec::new()));
    let (ra, rb, rc) = (registry.clone(), registry.clone(), registry.clone());

    let tree = supervisor::start(move |children| {
        children
            .add(named_worker("a", ra))
            .add(named_worker("b", rb))
            .add(named_worker("c", rc))
    })
    .expect("tree starts");

    test_section!("crash the middle child");
    let a = latest(&registry, "a");
    let b = latest(&registry, "b");
    process::kill(b.owner());

    let deadline = Instant::now() + Duration::from_secs(2);
    while registry.lock().len() < 5 {
        assert!(Instant::now() < deadline, "tree never recovered");
        std::thread::sleep(Duration::from_millis(5));
    }

    test_section!("older sibling untouched, younger replaced");
    assert_eq!(latest(&registry, "a").owner(), a.owner());
    assert_ne!(latest(&registry, "b").owner(), b.owner());
    let answer: &str = latest(&registry, "b").call(Worker::Whoami, Duration::from_secs(1));
    assert_eq!(answer, "b");
    let answer: &str = latest(&registry, "c").call(Worker::Whoami, Duration::from_secs(1));
    assert_eq!(answer, "c");
    assert!(process::is_alive(tree.owner()));

    test_complete!("a_tree_survives_a_middle_child_crash");
}

#[test]
fn nested_supervisors_contain_failures() {
    init_test("nested_supervisors_contain_failures");

    let registry: Registry = Arc::new(Mutex::new(Vec::new()));
    let (inner_reg, outer_reg) = (registry.clone(), registry.clone());

    // outer supervises [inner supervisor, "outer" worker]; inner supervises
    // ["inner" worker]. Crashing the inner worker must stay inside the inner
    // supervisor.
    let outer = supervisor::start(move |children| {
        children
            .add(supervisor::worker(move |()| {
                let inner_reg = inner_reg.clone();
                let inner = supervisor::start(move |children| {
                    children.add(named_worker("inner", inner_reg))
                })?;
                // Address the inner supervisor like any child: its subject's
                // owner is the pid the outer tree would restart.
                Ok(inner)
            }))
            .add(named_worker("outer", outer_reg))
    })
    .expect("outer tree starts");

    let inner_worker = latest(&registry, "inner");
    let outer_worker = latest(&registry, "outer");

    process::kill(inner_worker.owner());

    let deadline = Instant::now() + Duration::from_secs(2);
    while latest(&registry, "inner").owner() == inner_worker.owner() {
        assert!(Instant::now() < deadline, "inner tree never recovered");
        std::thread::sleep(Duration::from_millis(5));
    }

    // The outer worker was not restarted: failure was contained.
    assert_eq!(latest(&registry, "outer").owner(), outer_worker.owner());
    let answer: &str = latest(&registry, "inner").call(Worker::Whoami, Duration::from_secs(1));
    assert_eq!(answer, "inner");
    assert!(process::is_alive(outer.owner()));

    test_complete!("nested_supervisors_contain_failures");
}

#[test]
fn the_tree_is_inspectable_while_running() {
    init_test("the_tree_is_inspectable_while_running");

    let registry: Registry = Arc::new(Mutex::new(Vec::new()));
    let reg = registry.clone();
    let tree = supervisor::start(move |children| children.add(named_worker("w", reg)))
        .expect("tree starts");

    let status = system::get_status(tree.owner(), Duration::from_secs(1)).expect("status");
    assert_eq!(status.module, arbor::Atom::new("supervisor"));
    assert_eq!(status.mode, arbor::Mode::Running);

    let state = system::get_state(tree.owner(), Duration::from_secs(1))
        .expect("state")
        .downcast::<String>()
        .expect("debug rendering");
    let worker_pid = latest(&registry, "w").owner();
    assert!(
        state.contains(&worker_pid.to_string()),
        "state {state} does not mention child {worker_pid}"
    );

    test_complete!("the_tree_is_inspectable_while_running");
}

#[test]
fn argument_threading_feeds_each_child_its_predecessors_output() {
    init_test("argument_threading_feeds_each_child_its_predecessors_output");

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (s1, s2) = (seen.clone(), seen.clone());

    let _tree = supervisor::start_spec(supervisor::Spec::new(
        "root".to_owned(),
        move |children| {
            children
                .add(
                    supervisor::worker(move |label: String| {
                        s1.lock().push(label);
                        actor::start((), |(): (), ()| Next::Continue(()))
                    })
                    .returning(|label, _subject| format!("{label}/left")),
                )
                .add(
                    supervisor::worker(move |label: String| {
                        s2.lock().push(label);
                        actor::start((), |(): (), ()| Next::Continue(()))
                    })
                    .returning(|label, _subject| format!("{label}/right")),
                )
        },
    ))
    .expect("tree starts");

    assert_eq!(*seen.lock(), vec!["root".to_owned(), "root/left".to_owned()]);

    test_complete!("argument_threading_feeds_each_child_its_predecessors_output");
}

#[test]
fn a_child_that_cannot_start_fails_the_whole_tree_boot() {
    init_test("a_child_that_cannot_start_fails_the_whole_tree_boot");

    let _exits = process::trap_exits();
    let result = supervisor::start(|children| {
        children
            .add(supervisor::worker(|()| {
                actor::start((), |(): (), ()| Next::Continue(()))
            }))
            .add(supervisor::worker(
                |()| -> Result<Subject<()>, StartError> {
                    Err(StartError::InitFailed(arbor::ExitReason::Abnormal(
                        "port in use".into(),
                    )))
                },
            ))
    });
    assert!(
        matches!(result, Err(StartError::InitFailed(_))),
        "got {result:?}"
    );

    test_complete!("a_child_that_cannot_start_fails_the_whole_tree_boot");
}
