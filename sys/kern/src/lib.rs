// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! perch kernel.
//!
//! This is the application-independent portion of the operating system: a
//! small preemptive scheduler with priority-ordered ready queues, plus the
//! pieces a scheduler cannot exist without (a kernel heap, context-switch
//! primitives, interrupt plumbing for the serial driver).
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic ideas
//! that appear consistently.
//!
//! 1. Tasks are dynamic. They are created and destroyed at runtime, their
//!    control blocks and (usually) stacks come from the kernel heap, and an
//!    idle task reaps whatever exits.
//! 2. All scheduler state lives behind one interrupt-masked critical
//!    section. Handler-context code reaches the same state through the same
//!    gate.
//! 3. A strong preference for safe code where reasonable; the unavoidable
//!    unsafety (context-switch assembly, intrusive queue links, raw TCB
//!    storage) is concentrated in `arch` and `list`.
//! 4. Everything outside the `arch` module is portable enough to run under
//!    `cargo test` on the host, where `arch/fake.rs` stands in for the
//!    machine.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod heap;
pub mod isr;
mod list;
pub mod task;
pub mod time;
