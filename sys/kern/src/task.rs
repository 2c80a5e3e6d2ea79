// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task lifecycle and scheduling.
//!
//! Tasks live on the kernel heap and move between four states: Ready (in
//! the ready queue for their priority), Blocked (in the blocked queue,
//! tagged with a reason), Exited (in the exited queue, awaiting the idle
//! task's reaper), and Active (in no queue; exactly one task after the
//! scheduler starts). The selector always runs the head of the highest
//! non-empty ready queue, and re-queues the outgoing task at the tail of
//! its level, which yields round-robin among equals.
//!
//! All queue state sits behind `with_sched`, an interrupt-masked critical
//! section, because both task-context calls (`create`, `yield_now`, ...) and
//! handler-context code (the selector inside the context-switch exception,
//! `unblock` from driver interrupts) mutate it.

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::ptr::NonNull;

use abi::config;
use abi::{BlockReason, Priority, SysError, TaskFlags, TaskState};

use crate::arch;
use crate::heap;
use crate::list::TaskQueue;

/// Smallest stack we'll accept for a task: the bootstrap frame plus room
/// for the entry function to do anything at all.
pub const MIN_STACK_SIZE: usize = 128;

/// Stacks are 8-byte aligned per the AAPCS.
const STACK_ALIGN: usize = 8;

const IDLE_TASK_NAME: &str = "idle";

/// Task control block.
///
/// The fields are private so that state transitions stay inside this
/// module, where the queue invariants are enforced.
#[repr(C)] // so location of stack_ptr is predictable
pub struct Tcb {
    /// Saved process stack pointer while the task is not running.
    stack_ptr: *mut u32,
    // NOTE: it is critical that the above field appear first! The
    // context-switch handlers load and store through the TCB pointer
    // directly.
    /// Low end of the stack region; the allocation base when owned.
    stack_base: *mut u8,
    /// One past the high end of the stack region. Stacks grow down, so
    /// `stack_base < stack_ptr <= stack_top` whenever the task is
    /// suspended.
    stack_top: *mut u8,
    /// Task entry point and its opaque argument word.
    entry: fn(usize),
    arg: usize,
    state: TaskState,
    priority: Priority,
    flags: TaskFlags,
    name: Option<&'static str>,
    /// Intrusive queue link; a task is in at most one queue at a time.
    pub(crate) next: Option<TaskHandle>,
}

/// Opaque, copyable reference to a task.
///
/// A handle stays valid until the task it names is destroyed and reaped;
/// holding a handle does not keep the task alive. This mirrors how the
/// driver layer uses handles: purely as wake targets, guarded by the block
/// reason check.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskHandle(NonNull<Tcb>);

impl TaskHandle {
    pub(crate) fn as_ptr(self) -> *mut Tcb {
        self.0.as_ptr()
    }
}

/// Creation parameters for [`create`]. `Default` gives a nameless task at
/// the default priority with a kernel-allocated default-size stack.
pub struct TaskConfig {
    pub name: Option<&'static str>,
    pub priority: Priority,
    /// Stack size in bytes when the kernel allocates the stack; ignored
    /// when `stack` is supplied.
    pub stack_size: usize,
    /// Caller-supplied stack memory, used in place and never freed by the
    /// kernel. `None` allocates `stack_size` bytes from the kernel heap.
    pub stack: Option<&'static mut [u8]>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: None,
            priority: config::DEFAULT_PRIORITY,
            stack_size: config::DEFAULT_STACK_SIZE,
            stack: None,
        }
    }
}

struct Scheduler {
    ready: [TaskQueue; config::PRIORITY_COUNT],
    blocked: TaskQueue,
    exited: TaskQueue,
}

struct SchedCell(UnsafeCell<Scheduler>);

// Safety: the cell is only opened inside `with_sched`, under the
// architecture critical section.
unsafe impl Sync for SchedCell {}

static SCHED: SchedCell = {
    const EMPTY: TaskQueue = TaskQueue::new();
    SchedCell(UnsafeCell::new(Scheduler {
        ready: [EMPTY; config::PRIORITY_COUNT],
        blocked: TaskQueue::new(),
        exited: TaskQueue::new(),
    }))
};

fn with_sched<R>(body: impl FnOnce(&mut Scheduler) -> R) -> R {
    arch::critical_section(|| {
        // Safety: interrupts are masked and the kernel never re-enters the
        // scheduler from inside this closure.
        body(unsafe { &mut *SCHED.0.get() })
    })
}

/// Creates a task. The task is queued as Ready at its priority and will
/// first run once the scheduler selects it; creation never preempts.
///
/// Fails with `BadParam` for an out-of-range priority or an undersized
/// stack, and with `NoMem` when the kernel heap cannot cover the stack or
/// the control block. On failure nothing is left allocated.
pub fn create(
    entry: fn(usize),
    arg: usize,
    config: TaskConfig,
) -> Result<TaskHandle, SysError> {
    // Check everything before acquiring anything, so the failure paths
    // below only ever have the TCB to give back.
    if !config.priority.is_valid() {
        return Err(SysError::BadParam);
    }
    let supplied_len = config.stack.as_ref().map(|stack| stack.len());
    if supplied_len.unwrap_or(config.stack_size) < MIN_STACK_SIZE {
        return Err(SysError::BadParam);
    }
    let owned_layout = match supplied_len {
        None => Some(stack_layout(config.stack_size)?),
        Some(_) => None,
    };

    let tcb_ptr = heap::allocate(Layout::new::<Tcb>())?.cast::<Tcb>();
    let (stack_base, stack_len, flags) = match (config.stack, owned_layout)
    {
        (Some(stack), _) => {
            (stack.as_mut_ptr(), stack.len(), TaskFlags::empty())
        }
        (None, Some(layout)) => match heap::allocate(layout) {
            Ok(ptr) => {
                (ptr.as_ptr(), config.stack_size, TaskFlags::STACK_OWNED)
            }
            Err(e) => {
                // Safety: just allocated, never published.
                unsafe {
                    release_tcb(tcb_ptr);
                }
                return Err(e);
            }
        },
        (None, None) => unreachable!(),
    };
    // Safety: freshly allocated, properly aligned for Tcb.
    unsafe {
        tcb_ptr.as_ptr().write(Tcb {
            stack_ptr: core::ptr::null_mut(),
            stack_base,
            stack_top: stack_base.add(stack_len),
            entry,
            arg,
            state: TaskState::Ready,
            priority: config.priority,
            flags,
            name: config.name,
            next: None,
        });
        // Safety: the stack region is writable and at least MIN_STACK_SIZE
        // bytes, which covers the bootstrap frame.
        let tcb = &mut *tcb_ptr.as_ptr();
        tcb.stack_ptr = arch::initialize_task_stack(
            tcb.stack_top as *mut u32,
            tcb.entry,
            tcb.arg,
        );
    }
    let handle = TaskHandle(tcb_ptr);
    with_sched(|sched| {
        sched.ready[config.priority.index()].push_back(handle)
    });
    Ok(handle)
}

/// Starts the operating system. Creates the idle task, then enters the
/// start exception; scheduled tasks begin executing by priority and control
/// never comes back here. If it does anyway, the scheduler is broken and
/// the system stops.
pub fn start() -> ! {
    let idle_config = TaskConfig {
        name: Some(IDLE_TASK_NAME),
        priority: config::IDLE_PRIORITY,
        stack_size: config::IDLE_STACK_SIZE,
        stack: None,
    };
    if create(idle_entry, 0, idle_config).is_err() {
        klog::error!("could not create idle task");
        panic!("scheduler fault");
    }
    arch::start_scheduler();
    klog::error!("scheduler returned without starting");
    panic!("scheduler fault");
}

/// Surrenders the processor. The calling task goes to the tail of its
/// ready queue and the highest-priority ready task runs next, which may be
/// the caller again. Task context only.
pub fn yield_now() {
    let Some(active) = active_task() else {
        return;
    };
    with_sched(|_| {
        // Safety: the active task is live by definition.
        unsafe {
            (*active.as_ptr()).state = TaskState::Ready;
        }
    });
    arch::pend_context_switch();
}

/// Destroys a task, stopping it for good.
///
/// Destroying the active task parks it on the exited queue -- the running
/// context cannot free the stack it is standing on -- and re-enters the
/// scheduler through the start exception, because the ordinary context
/// switch would try to save state for a task that must never resume. The
/// idle task frees the remains.
///
/// Destroying any other task unlinks it from whatever queue its state
/// names and frees it immediately.
pub fn destroy(task: TaskHandle) {
    if Some(task) == active_task() {
        with_sched(|sched| {
            // Safety: the active task is live.
            unsafe {
                (*task.as_ptr()).state = TaskState::Exited;
            }
            sched.exited.push_back(task);
            arch::clear_active_task();
        });
        arch::trigger_start_exception();
    } else {
        let unlinked = with_sched(|sched| {
            // Safety: the caller asserts the handle is live by handing it
            // in; a live non-active task is in exactly the queue its state
            // names.
            let state = unsafe { (*task.as_ptr()).state };
            let priority = unsafe { (*task.as_ptr()).priority };
            match state {
                TaskState::Blocked(_) => sched.blocked.remove(task),
                TaskState::Ready => {
                    sched.ready[priority.index()].remove(task)
                }
                TaskState::Exited => sched.exited.remove(task),
                TaskState::Active => {
                    klog::warn!("destroyed task is neither active nor queued");
                    false
                }
            }
        });
        if unlinked {
            // Safety: just unlinked, so nothing references it anymore.
            unsafe {
                free_task(task);
            }
        }
    }
}

/// Gets the active task, if the scheduler has started. Used by the driver
/// layer to name the task that is about to block.
pub fn active_task() -> Option<TaskHandle> {
    NonNull::new(arch::active_task_ptr()).map(TaskHandle)
}

/// Blocks the active task for `reason` and schedules away from it. Returns
/// once a matching [`unblock`] has run and the scheduler has picked this
/// task again. Task context only; before the scheduler starts this is a
/// no-op, so callers must re-check their condition after it returns.
pub fn block_active(reason: BlockReason) {
    let Some(active) = active_task() else {
        return;
    };
    with_sched(|_| {
        // Safety: the active task is live.
        unsafe {
            (*active.as_ptr()).state = TaskState::Blocked(reason);
        }
    });
    arch::pend_context_switch();
}

/// Wakes `task` if -- and only if -- it is blocked for exactly `reason`.
/// Anything else is a stale wakeup and is ignored. The woken task becomes
/// Ready but does not preempt; it runs at the next scheduling point.
///
/// Callable from interrupt handlers; this is how the serial driver's ISR
/// resumes a task stuck on a full or empty ring.
pub fn unblock(task: TaskHandle, reason: BlockReason) {
    with_sched(|sched| {
        // Safety: wake sources hold handles only to tasks they blocked, and
        // the reason check rejects reuse after the task moved on.
        let tcb = unsafe { &mut *task.as_ptr() };
        if tcb.state != TaskState::Blocked(reason) {
            return;
        }
        if Some(task) == active_task() {
            // The wake arrived in the window between the block taking
            // effect and the context switch that would park the task; the
            // block simply never happened. The pending switch will re-queue
            // the task normally.
            tcb.state = TaskState::Active;
            return;
        }
        sched.blocked.remove(task);
        tcb.state = TaskState::Ready;
        sched.ready[tcb.priority.index()].push_back(task);
    });
}

/// Scheduling policy. Called from the context-switch and start exceptions
/// (hence the C linkage); interrupts are masked by the caller on hardware,
/// and `with_sched` masks again anyway for the host harness's benefit.
///
/// Picks the head of the highest non-empty ready queue. The outgoing task,
/// if any, is first re-linked according to its state: Blocked tasks go to
/// the blocked queue, anything else to the tail of its ready queue. If no
/// task is ready at all, the outgoing task simply keeps the processor --
/// even if it just tried to block, in which case it resumes and its caller
/// re-checks the condition it blocked on.
#[no_mangle]
pub extern "C" fn select_active_task() {
    with_sched(Scheduler::select);
}

impl Scheduler {
    fn select(&mut self) {
        let next = self
            .ready
            .iter_mut()
            .rev()
            .find_map(TaskQueue::pop_front);
        let prev = active_task();
        let Some(next) = next else {
            match prev {
                Some(prev) => {
                    // Safety: the active task is live.
                    unsafe {
                        (*prev.as_ptr()).state = TaskState::Active;
                    }
                }
                // The idle task is always ready or active, so an empty
                // system means the state machine has been corrupted.
                None => panic!("no runnable task"),
            }
            return;
        };
        if let Some(prev) = prev {
            // Safety: the outgoing task is live; it is in no queue while
            // active.
            let tcb = unsafe { &mut *prev.as_ptr() };
            match tcb.state {
                TaskState::Blocked(_) => self.blocked.push_back(prev),
                _ => {
                    tcb.state = TaskState::Ready;
                    self.ready[tcb.priority.index()].push_back(prev);
                }
            }
        }
        // Safety: `next` came off a ready queue, so it is live; the pointer
        // stays valid until the task is destroyed, which unlinks it first.
        unsafe {
            (*next.as_ptr()).state = TaskState::Active;
            arch::set_active_task(next.as_ptr());
        }
    }
}

/// Checks whether a ready task outranks the active one; the tick handler
/// uses this to decide when to pend a preemptive switch. Equal priority is
/// not enough -- peers wait for a yield.
pub(crate) fn preemption_pending() -> bool {
    let Some(active) = active_task() else {
        return false;
    };
    // Safety: the active task is live.
    let active_priority = unsafe { (*active.as_ptr()).priority };
    with_sched(|sched| {
        sched.ready.iter().enumerate().any(|(level, queue)| {
            !queue.is_empty()
                && Priority(level as u8)
                    .is_more_important_than(active_priority)
        })
    })
}

/// Landing point for tasks whose entry function returns. The address is
/// seeded into every bootstrap frame's link register, so falling off the
/// end of a task function arrives here in thread mode, on the task's own
/// stack, with the task still active.
pub(crate) extern "C" fn task_exit_trampoline() -> ! {
    if let Some(active) = active_task() {
        // Safety: the active task is live.
        let name = unsafe { (*active.as_ptr()).name }.unwrap_or("");
        klog::info!("task '{}' exited", name);
        destroy(active);
    }
    // destroy(active) switches away permanently; resuming here means the
    // scheduler lost track of the running context.
    panic!("exit trampoline resumed");
}

/// Idle loop. Runs at the bottom priority when nothing else can; frees
/// whatever the exited queue has accumulated, then offers the processor
/// back.
fn idle_entry(_arg: usize) {
    loop {
        reap_exited();
        yield_now();
    }
}

fn reap_exited() {
    loop {
        let Some(task) = with_sched(|sched| sched.exited.pop_front())
        else {
            break;
        };
        // Safety: the task is unlinked and exited; nothing can reach it.
        unsafe {
            klog::debug!(
                "reaping task '{}'",
                (*task.as_ptr()).name.unwrap_or("")
            );
            free_task(task);
        }
    }
}

/// Releases a task's storage: its stack if the kernel owns it, then the
/// TCB itself.
///
/// # Safety
///
/// The task must be unlinked from every queue, must not be active, and the
/// handle must not be used afterwards.
unsafe fn free_task(task: TaskHandle) {
    let tcb = task.as_ptr();
    let stack_base = (*tcb).stack_base;
    let stack_len = (*tcb).stack_top as usize - stack_base as usize;
    let owned = (*tcb).flags.contains(TaskFlags::STACK_OWNED);
    if owned {
        if let Ok(layout) = stack_layout(stack_len) {
            heap::deallocate(NonNull::new_unchecked(stack_base), layout);
        }
    }
    heap::deallocate(
        NonNull::new_unchecked(tcb as *mut u8),
        Layout::new::<Tcb>(),
    );
}

fn stack_layout(size: usize) -> Result<Layout, SysError> {
    Layout::from_size_align(size, STACK_ALIGN)
        .map_err(|_| SysError::BadParam)
}

/// Returns an unused, never-linked TCB allocation to the heap; for the
/// creation error paths.
///
/// # Safety
///
/// `tcb_ptr` must have come from the heap with `Layout::new::<Tcb>()` and
/// must not have been published anywhere.
unsafe fn release_tcb(tcb_ptr: NonNull<Tcb>) {
    heap::deallocate(tcb_ptr.cast(), Layout::new::<Tcb>());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// The scheduler is process-global state; tests take this lock and
    /// reset everything before touching it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn scheduler_test() -> MutexGuard<'static, ()> {
        let guard =
            TEST_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        // The previous test may have left a task installed as active; it is
        // in no queue, so it must be freed here or it leaks for the rest of
        // the test run.
        if let Some(active) = active_task() {
            arch::clear_active_task();
            unsafe { free_task(active) };
        }
        arch::reset();
        loop {
            let task = with_sched(|sched| {
                sched
                    .blocked
                    .pop_front()
                    .or_else(|| sched.exited.pop_front())
                    .or_else(|| {
                        sched.ready.iter_mut().find_map(TaskQueue::pop_front)
                    })
            });
            match task {
                Some(task) => unsafe { free_task(task) },
                None => break,
            }
        }
        guard
    }

    fn noop_entry(_arg: usize) {}

    fn spawn(name: &'static str, priority: u8) -> TaskHandle {
        create(
            noop_entry,
            0,
            TaskConfig {
                name: Some(name),
                priority: Priority(priority),
                stack_size: 256,
                stack: None,
            },
        )
        .expect("task creation should succeed")
    }

    /// Emulates the context-switch exception: asserts one was requested,
    /// then runs the selector the way the handler would.
    fn pump_switch() {
        assert!(
            arch::take_pended_switch(),
            "expected a pended context switch"
        );
        select_active_task();
    }

    fn state_of(task: TaskHandle) -> TaskState {
        unsafe { (*task.as_ptr()).state }
    }

    fn active_name() -> &'static str {
        let active = active_task().expect("a task should be active");
        unsafe { (*active.as_ptr()).name }.unwrap_or("")
    }

    /// Walks every queue and cross-checks states: the heart of the
    /// "membership matches state" invariant.
    fn check_consistency() {
        with_sched(|sched| {
            for (priority, queue) in sched.ready.iter().enumerate() {
                for task in queue.iter() {
                    let tcb = unsafe { &*task.as_ptr() };
                    assert_eq!(tcb.state, TaskState::Ready);
                    assert_eq!(tcb.priority.index(), priority);
                }
            }
            for task in sched.blocked.iter() {
                let state = unsafe { (*task.as_ptr()).state };
                assert!(matches!(state, TaskState::Blocked(_)));
            }
            for task in sched.exited.iter() {
                assert_eq!(
                    unsafe { (*task.as_ptr()).state },
                    TaskState::Exited
                );
            }
            if let Some(active) = active_task() {
                assert_eq!(
                    unsafe { (*active.as_ptr()).state },
                    TaskState::Active
                );
                let queued_somewhere = sched
                    .ready
                    .iter()
                    .chain([&sched.blocked, &sched.exited])
                    .any(|queue| queue.iter().any(|task| task == active));
                assert!(!queued_somewhere, "active task must not be queued");
            }
        });
    }

    #[test]
    fn create_queues_task_ready() {
        let _guard = scheduler_test();
        let task = spawn("a", 4);
        assert_eq!(state_of(task), TaskState::Ready);
        check_consistency();
    }

    #[test]
    fn create_rejects_out_of_range_priority() {
        let _guard = scheduler_test();
        let result = create(
            noop_entry,
            0,
            TaskConfig {
                priority: Priority(config::PRIORITY_COUNT as u8),
                ..TaskConfig::default()
            },
        );
        assert_eq!(result.err(), Some(SysError::BadParam));
    }

    #[test]
    fn create_failure_releases_everything() {
        let _guard = scheduler_test();
        let used_before = heap::used();
        let result = create(
            noop_entry,
            0,
            TaskConfig {
                stack_size: config::HEAP_SIZE * 2,
                ..TaskConfig::default()
            },
        );
        assert_eq!(result.err(), Some(SysError::NoMem));
        assert_eq!(heap::used(), used_before);
        // The heap must still be healthy enough for an ordinary create.
        let task = spawn("after-failure", 3);
        destroy(task);
    }

    #[test]
    fn caller_supplied_stack_is_not_owned() {
        let _guard = scheduler_test();
        let stack: &'static mut [u8] =
            Box::leak(vec![0u8; 256].into_boxed_slice());
        let task = create(
            noop_entry,
            0,
            TaskConfig {
                name: Some("borrowed"),
                stack: Some(stack),
                ..TaskConfig::default()
            },
        )
        .expect("create with supplied stack should succeed");
        let flags = unsafe { (*task.as_ptr()).flags };
        assert!(!flags.contains(TaskFlags::STACK_OWNED));
        destroy(task);
    }

    #[test]
    fn selector_prefers_highest_priority() {
        let _guard = scheduler_test();
        spawn("low", 2);
        let high = spawn("high", 7);
        spawn("mid", 5);
        select_active_task();
        assert_eq!(active_task(), Some(high));
        assert_eq!(state_of(high), TaskState::Active);
        check_consistency();
    }

    #[test]
    fn equal_priority_tasks_round_robin() {
        let _guard = scheduler_test();
        spawn("a", 5);
        spawn("b", 5);
        select_active_task();

        let mut order = Vec::new();
        for _ in 0..6 {
            order.push(active_name());
            yield_now();
            pump_switch();
            check_consistency();
        }
        assert_eq!(order, ["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn yield_with_nothing_else_ready_keeps_task_active() {
        let _guard = scheduler_test();
        let only = spawn("only", 5);
        select_active_task();
        assert_eq!(active_task(), Some(only));

        yield_now();
        pump_switch();
        assert_eq!(active_task(), Some(only));
        assert_eq!(state_of(only), TaskState::Active);
        check_consistency();
    }

    #[test]
    fn stale_unblock_is_ignored() {
        let _guard = scheduler_test();
        spawn("idle", 0);
        let task = spawn("t", 5);
        select_active_task();
        assert_eq!(active_task(), Some(task));

        block_active(BlockReason::UartRxEmpty);
        pump_switch();
        assert_eq!(
            state_of(task),
            TaskState::Blocked(BlockReason::UartRxEmpty)
        );
        assert_eq!(active_name(), "idle");
        check_consistency();

        // Wrong reason: the scheduler must not move.
        unblock(task, BlockReason::UartTxFull);
        assert_eq!(
            state_of(task),
            TaskState::Blocked(BlockReason::UartRxEmpty)
        );
        check_consistency();

        // Matching reason: Ready, but no preemption until a scheduling
        // point.
        unblock(task, BlockReason::UartRxEmpty);
        assert_eq!(state_of(task), TaskState::Ready);
        assert!(!arch::take_pended_switch());
        assert_eq!(active_name(), "idle");
        check_consistency();

        // The tick would now see a higher-priority ready task and preempt.
        assert!(preemption_pending());
        select_active_task();
        assert_eq!(active_task(), Some(task));
        check_consistency();
    }

    #[test]
    fn unblock_raced_before_switch_repairs_active_task() {
        let _guard = scheduler_test();
        let task = spawn("t", 5);
        select_active_task();

        block_active(BlockReason::UartTxFull);
        // The ISR wins the race: the wake lands before the pended switch
        // runs.
        unblock(task, BlockReason::UartTxFull);
        assert_eq!(state_of(task), TaskState::Active);
        check_consistency();

        pump_switch();
        assert_eq!(active_task(), Some(task));
        check_consistency();
    }

    #[test]
    fn repeated_block_unblock_cycles_preserve_fifo() {
        let _guard = scheduler_test();
        spawn("idle", 0);
        let a = spawn("a", 5);
        let b = spawn("b", 5);
        select_active_task();
        assert_eq!(active_task(), Some(a));

        // a blocks; b runs; b blocks; idle runs.
        block_active(BlockReason::UartRxEmpty);
        pump_switch();
        assert_eq!(active_task(), Some(b));
        block_active(BlockReason::UartRxEmpty);
        pump_switch();
        assert_eq!(active_name(), "idle");

        // Wake in reverse order; readiness order must follow wake order.
        unblock(b, BlockReason::UartRxEmpty);
        unblock(a, BlockReason::UartRxEmpty);
        select_active_task();
        assert_eq!(active_task(), Some(b));
        yield_now();
        pump_switch();
        assert_eq!(active_task(), Some(a));
        check_consistency();
    }

    #[test]
    fn destroy_nonactive_unlinks_from_ready() {
        let _guard = scheduler_test();
        let a = spawn("a", 5);
        let b = spawn("b", 3);
        select_active_task();
        assert_eq!(active_task(), Some(a));
        let used_before_destroy = heap::used();

        destroy(b);
        assert!(heap::used() < used_before_destroy);
        with_sched(|sched| {
            assert!(sched.ready[3].is_empty());
        });
        check_consistency();
    }

    #[test]
    fn destroy_active_parks_for_idle_to_reap() {
        let _guard = scheduler_test();
        spawn("idle", 0);
        let doomed = spawn("doomed", 5);
        select_active_task();
        assert_eq!(active_task(), Some(doomed));

        // Destroying the active task re-enters the scheduler synchronously
        // (the fake start exception), so idle is running when this returns.
        destroy(doomed);
        assert_eq!(active_name(), "idle");
        assert_eq!(state_of(doomed), TaskState::Exited);
        check_consistency();

        // The idle loop's reaper frees the remains.
        let used_before_reap = heap::used();
        reap_exited();
        assert!(heap::used() < used_before_reap);
        with_sched(|sched| assert!(sched.exited.is_empty()));
        check_consistency();
    }

    #[test]
    fn preemption_pending_only_for_strictly_higher() {
        let _guard = scheduler_test();
        let mid = spawn("mid", 4);
        select_active_task();
        assert_eq!(active_task(), Some(mid));

        spawn("peer", 4);
        assert!(!preemption_pending());
        spawn("above", 5);
        assert!(preemption_pending());
    }
}
