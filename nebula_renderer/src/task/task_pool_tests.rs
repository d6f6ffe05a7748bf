//! Unit tests for TaskPool

use std::time::Duration;
use crate::task::task_pool::*;

const IDLE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Context {
    values: Vec<Option<u32>>,
}

fn complete_all(pool: &mut TaskPool<Context>, context: &mut Context) -> Vec<TaskId> {
    let finished = pool.poll_until_idle(IDLE);
    let ids = finished.iter().map(|task| task.id()).collect();
    for task in finished {
        task.complete(context);
    }
    ids
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_new_spawns_at_least_one_worker() {
    let pool = TaskPool::<Context>::new(0).unwrap();
    assert_eq!(pool.worker_count(), 1);

    let pool = TaskPool::<Context>::new(3).unwrap();
    assert_eq!(pool.worker_count(), 3);
}

#[test]
fn test_submit_then_complete_delivers_output() {
    let mut pool = TaskPool::<Context>::new(2).unwrap();
    let mut context = Context::default();

    let id = pool.submit(|| 21 * 2, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value));
    assert_eq!(pool.pending(), 1);

    let finished = pool.poll_until_idle(IDLE);
    assert_eq!(finished.len(), 1);
    assert_eq!(pool.state(id), TaskState::Processed);
    assert!(context.values.is_empty());

    for task in finished {
        assert!(!task.was_aborted());
        task.complete(&mut context);
    }

    assert_eq!(context.values, vec![Some(42)]);
    assert_eq!(pool.state(id), TaskState::Done);
    assert_eq!(pool.pending(), 0);
}

#[test]
fn test_unknown_id_is_uninitialized() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    assert_eq!(pool.state(TaskId(0)), TaskState::Uninitialized);

    let id = pool.submit(|| 1u32, |_: &mut Context, _: Option<u32>| {});
    assert_eq!(id.raw(), 0);
    assert_eq!(pool.state(TaskId(1)), TaskState::Uninitialized);

    let mut context = Context::default();
    complete_all(&mut pool, &mut context);
    assert_eq!(pool.state(id), TaskState::Done);
}

#[test]
fn test_many_tasks_all_complete() {
    let mut pool = TaskPool::<Context>::new(4).unwrap();
    let mut context = Context::default();

    let ids: Vec<TaskId> = (0..32u32)
        .map(|i| pool.submit(move || i, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value)))
        .collect();

    let completed = complete_all(&mut pool, &mut context);

    assert_eq!(completed.len(), 32);
    let mut values: Vec<u32> = context.values.iter().map(|v| v.unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, (0..32).collect::<Vec<_>>());
    assert!(ids.iter().all(|id| pool.state(*id) == TaskState::Done));
}

// ============================================================================
// ABORT / FAILURE
// ============================================================================

#[test]
fn test_abort_waiting_task_skips_job() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    let mut context = Context::default();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);

    // Occupy the only worker until released
    let blocker = pool.submit(
        move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            1u32
        },
        |ctx: &mut Context, value: Option<u32>| ctx.values.push(value),
    );
    started_rx.recv_timeout(IDLE).unwrap();

    let victim = pool.submit(|| 99u32, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value));
    assert_eq!(pool.state(victim), TaskState::Waiting);
    assert_eq!(pool.state(blocker), TaskState::Processing);

    assert!(pool.abort(victim));
    assert!(!pool.abort(blocker));
    release_tx.send(()).unwrap();

    let finished = pool.poll_until_idle(IDLE);
    assert_eq!(finished.len(), 2);
    for task in finished {
        assert_eq!(task.was_aborted(), task.id() == victim);
        task.complete(&mut context);
    }

    assert_eq!(context.values, vec![Some(1), None]);
    assert_eq!(pool.state(victim), TaskState::Done);
}

#[test]
fn test_abort_unknown_task_returns_false() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    let mut context = Context::default();
    let id = pool.submit(|| 5u32, |_: &mut Context, _: Option<u32>| {});
    complete_all(&mut pool, &mut context);

    assert!(!pool.abort(id));
}

#[test]
fn test_panicking_job_completes_with_none() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    let mut context = Context::default();

    let id = pool.submit(
        || -> u32 { panic!("decoder blew up") },
        |ctx: &mut Context, value: Option<u32>| ctx.values.push(value),
    );
    complete_all(&mut pool, &mut context);

    assert_eq!(context.values, vec![None]);
    assert_eq!(pool.state(id), TaskState::Done);

    // The worker survives the panic
    pool.submit(|| 7u32, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value));
    complete_all(&mut pool, &mut context);
    assert_eq!(context.values, vec![None, Some(7)]);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_runs_queued_jobs() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    let mut context = Context::default();

    for i in 0..4u32 {
        pool.submit(move || i, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value));
    }
    pool.shutdown();
    assert_eq!(pool.worker_count(), 0);

    for task in pool.poll() {
        task.complete(&mut context);
    }
    assert_eq!(context.values, vec![Some(0), Some(1), Some(2), Some(3)]);
}

#[test]
fn test_submit_after_shutdown_finishes_aborted() {
    let mut pool = TaskPool::<Context>::new(1).unwrap();
    let mut context = Context::default();
    pool.shutdown();

    let id = pool.submit(|| 3u32, |ctx: &mut Context, value: Option<u32>| ctx.values.push(value));
    let finished = pool.poll();

    assert_eq!(finished.len(), 1);
    assert!(finished[0].was_aborted());
    for task in finished {
        task.complete(&mut context);
    }
    assert_eq!(context.values, vec![None]);
    assert_eq!(pool.state(id), TaskState::Done);
}
