//! End-to-end scenarios for the pull combinators.

use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::config::EngineConfig;
use rill_core::effect::{Effect, Io, NoEffect, Task, Translate};
use rill_core::error::PullError;
use rill_core::interrupt::InterruptSource;
use rill_core::pull::Pull;
use rill_core::stream::Stream;

type IoPull<O, R> = Pull<Io, O, R>;
type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, entry: &str) -> Task<()> {
    let log = log.clone();
    let entry = entry.to_string();
    Task::delay(move || log.lock().push(entry))
}

fn messages(err: &PullError) -> Vec<String> {
    err.errors().iter().map(ToString::to_string).collect()
}

// ============================================================================
// on_complete
// ============================================================================

#[test]
fn on_complete_runs_finalizer_then_reraises() {
    let log = new_log();
    let program =
        IoPull::<i32, ()>::raise_error("E").on_complete(IoPull::eval(record(&log, "side effect")));
    let err = program.stream().drain(Io).unwrap_err();
    assert_eq!(err.to_string(), "E");
    assert_eq!(*log.lock(), vec!["side effect"]);
}

#[test]
fn on_complete_finalizer_failure_surfaces_alone() {
    let log = new_log();
    let program = IoPull::<i32, ()>::output1(1)
        .then(IoPull::eval(record(&log, "body")))
        .on_complete(IoPull::<i32, ()>::raise_error("cleanup"));
    let mut chunks = program.stream().compile(Io);
    assert_eq!(chunks.next().unwrap().unwrap(), vec![1]);
    let err = chunks.next().unwrap().unwrap_err();
    assert_eq!(messages(&err), vec!["cleanup"]);
    assert_eq!(*log.lock(), vec!["body"]);
}

#[test]
fn on_complete_double_failure_puts_finalizer_first() {
    let program = IoPull::<i32, ()>::raise_error("original")
        .on_complete(IoPull::<i32, ()>::raise_error("cleanup"));
    let err = program.stream().drain(Io).unwrap_err();
    assert_eq!(messages(&err), vec!["cleanup", "original"]);
}

#[test]
fn on_complete_keeps_finalizer_result_and_outputs() {
    let program = IoPull::<i32, &str>::pure("body")
        .on_complete(IoPull::output1(2).as_("finalizer"));
    let (outputs, result) = program.run(Io).unwrap();
    assert_eq!(outputs, vec![2]);
    assert_eq!(result, "finalizer");
}

#[test]
fn on_complete_runs_after_interruption() {
    let log = new_log();
    let source = InterruptSource::new();
    let trigger = {
        let source = source.clone();
        Task::delay(move || source.interrupt())
    };
    let program = IoPull::<i32, ()>::eval(trigger)
        .then(IoPull::interrupt_point())
        .on_complete(IoPull::eval(record(&log, "finally")));

    let mut chunks = program
        .stream()
        .compile_with(Io, EngineConfig::default(), Some(source.token()));
    let err = chunks.next().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(*log.lock(), vec!["finally"]);
}

// ============================================================================
// attempt
// ============================================================================

#[test]
fn attempt_turns_failure_into_value() {
    let log = new_log();
    let program = IoPull::<i32, ()>::raise_error("caught")
        .attempt()
        .flat_map(|r| IoPull::output1(r.is_err() as i32))
        .then(IoPull::eval(record(&log, "continued")));
    assert_eq!(program.stream().to_vec(Io).unwrap(), vec![1]);
    assert_eq!(*log.lock(), vec!["continued"]);
}

#[test]
fn attempt_eval_lets_interruption_through() {
    let source = InterruptSource::new();
    source.interrupt();
    let program = IoPull::<i32, i32>::attempt_eval(Task::pure(1))
        .flat_map(|r| IoPull::output1(r.unwrap_or(-1)));
    let err = program
        .stream()
        .compile_with(Io, EngineConfig::default(), Some(source.token()))
        .find_map(Result::err)
        .unwrap();
    assert!(err.is_interrupted());
}

// ============================================================================
// loop_fn
// ============================================================================

#[test]
fn loop_emits_until_none() {
    let counter = IoPull::<i32, ()>::loop_fn(|r: i32| {
        if r < 3 {
            IoPull::pure(Some(r + 1)).flat_map(move |next| IoPull::output1(r).as_(next))
        } else {
            IoPull::pure(None)
        }
    });
    assert_eq!(counter(0).stream().to_vec(Io).unwrap(), vec![0, 1, 2]);
}

#[test]
fn loop_stops_at_first_failure() {
    let counter = IoPull::<i32, ()>::loop_fn(|r: i32| {
        if r == 2 {
            IoPull::raise_error(format!("failed at {r}"))
        } else {
            IoPull::output1(r).as_(Some(r + 1))
        }
    });
    let mut chunks = counter(0).stream().compile(Io);
    assert_eq!(chunks.next().unwrap().unwrap(), vec![0]);
    assert_eq!(chunks.next().unwrap().unwrap(), vec![1]);
    assert_eq!(chunks.next().unwrap().unwrap_err().to_string(), "failed at 2");
    assert!(chunks.next().is_none());
}

#[test]
fn loop_builds_lazily() {
    let built = Arc::new(Mutex::new(0));
    let seen = built.clone();
    let counter = IoPull::<i32, ()>::loop_fn(move |r: i32| {
        *seen.lock() += 1;
        IoPull::output1(r).as_(if r < 100 { Some(r + 1) } else { None })
    });
    let program = counter(0);
    assert_eq!(*built.lock(), 1);

    let mut chunks = program.stream().compile(Io);
    chunks.next();
    chunks.next();
    assert_eq!(*built.lock(), 2);
}

// ============================================================================
// map_output
// ============================================================================

#[test]
fn map_output_doubles_chunk() {
    let stream = IoPull::<i32, ()>::output(vec![1, 2, 3]).map_output(|o| o * 2).stream();
    let chunks: Vec<Vec<i32>> = stream.compile(Io).map(Result::unwrap).collect();
    assert_eq!(chunks, vec![vec![2, 4, 6]]);
}

#[test]
fn map_output_leaves_effects_and_resources_alone() {
    let log = new_log();
    let released = log.clone();
    let program = IoPull::<i32, i32>::acquire(Task::pure(10), move |r| {
        Task::delay(move || released.lock().push(format!("release {r}")))
    })
    .flat_map({
        let log = log.clone();
        move |r| {
            IoPull::output(vec![r, r + 1])
                .then(IoPull::eval(record(&log, "between")))
                .then(IoPull::output1(r + 2))
        }
    })
    .map_output(|o| format!("<{o}>"));

    let outputs = program.stream().to_vec(Io).unwrap();
    assert_eq!(outputs, vec!["<10>", "<11>", "<12>"]);
    assert_eq!(*log.lock(), vec!["between", "release 10"]);
}

// ============================================================================
// translate / covary
// ============================================================================

/// Wraps every `Io` task so that running it is counted.
struct Counting(Arc<Mutex<usize>>);

impl Translate<Io, Io> for Counting {
    fn apply<T: Send + 'static>(&self, fa: Task<T>) -> Task<T> {
        let count = self.0.clone();
        Task::new(move || {
            *count.lock() += 1;
            fa.run()
        })
    }
}

#[test]
fn translate_rewrites_effects_only() {
    let runs = Arc::new(Mutex::new(0));
    let program = IoPull::<i32, i32>::eval(Task::pure(1))
        .flat_map(|a| IoPull::output1(a).then(IoPull::eval(Task::pure(a + 1))))
        .translate(Counting(runs.clone()));
    let (outputs, result) = program.run(Io).unwrap();
    assert_eq!(outputs, vec![1]);
    assert_eq!(result, 2);
    assert_eq!(*runs.lock(), 2);
}

#[test]
fn translate_lifts_release_actions() {
    let runs = Arc::new(Mutex::new(0));
    let program = IoPull::<i32, i32>::acquire(Task::pure(1), |_| Task::pure(()))
        .void()
        .translate(Counting(runs.clone()));
    program.stream().drain(Io).unwrap();
    // One for the acquisition, one for the release.
    assert_eq!(*runs.lock(), 2);
}

#[test]
fn covary_preserves_behaviour() {
    let pure = Pull::<NoEffect, i32, ()>::output(vec![1, 2])
        .then(Pull::eval(40))
        .map(|n| n + 2);
    let (outputs, result) = pure.covary::<Io>().run(Io).unwrap();
    assert_eq!(outputs, vec![1, 2]);
    assert_eq!(result, 42);
}

#[test]
fn covary_output_and_resource_widen() {
    let narrow = IoPull::<u8, ()>::output1(7u8).as_(300u16);
    let wide: IoPull<u64, u32> = narrow.covary_output().covary_resource();
    assert_eq!(wide.run(Io).unwrap(), (vec![7u64], 300u32));
}

#[test]
fn pure_effect_substrate_runs_without_io() {
    let stream: Stream<NoEffect, i32> = Pull::output(vec![1, 2, 3]).stream();
    assert_eq!(stream.to_vec(NoEffect).unwrap(), vec![1, 2, 3]);
    assert_eq!(NoEffect.run(NoEffect::pure(5)).unwrap(), 5);
}

// ============================================================================
// Configuration limits
// ============================================================================

#[test]
fn step_budget_stops_runaway_loop() {
    let forever = IoPull::<i32, ()>::loop_fn(|n: u64| IoPull::pure(Some(n + 1)));
    let config = EngineConfig::builder().max_steps(Some(1_000)).build().unwrap();
    let err = forever(0)
        .stream()
        .compile_with(Io, config, None)
        .find_map(Result::err)
        .unwrap();
    assert!(matches!(err, PullError::StepLimitExceeded { limit: 1_000 }));
}

#[test]
fn scope_depth_is_bounded() {
    let mut program = IoPull::<i32, ()>::output1(0);
    for _ in 0..5 {
        program = program.scope();
    }
    let shallow = EngineConfig::builder().max_scope_depth(3).build().unwrap();
    let err = program
        .stream()
        .compile_with(Io, shallow, None)
        .find_map(Result::err)
        .unwrap();
    assert!(matches!(err, PullError::ScopeDepthExceeded { max_depth: 3 }));
}

#[test]
fn instruction_tracing_does_not_change_results() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("rill_core=trace"))
        .with_test_writer()
        .try_init();

    let config = EngineConfig::builder().trace_instructions(true).build().unwrap();
    let program = IoPull::<i32, i32>::acquire(Task::pure(1), |_| Task::pure(()))
        .flat_map(|r| IoPull::output(vec![r, r + 1]));
    let outputs: Vec<i32> = program
        .stream()
        .compile_with(Io, config, None)
        .flat_map(Result::unwrap)
        .collect();
    assert_eq!(outputs, vec![1, 2]);
}
