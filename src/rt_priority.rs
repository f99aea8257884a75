/*
 * Copyright 2019 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! Real-time scheduling hints for channel worker threads (§5: "Channel
//! workers run at elevated real-time priority").
//!
//! This is best-effort: a daemon without `CAP_SYS_NICE` cannot raise its
//! own scheduling class, so failure is logged and swallowed rather than
//! propagated, the way best-effort system calls elsewhere in this crate
//! are treated as warnings rather than fatal errors.

/// Requests the `SCHED_FIFO` real-time scheduling policy for the calling
/// thread, at `priority` (1-99, higher is more urgent).
///
/// Returns `Ok(())` on success. On failure (most commonly
/// `EPERM` when the process lacks the capability to raise its scheduling
/// class), logs a warning and returns `Ok(())` as well: callers should
/// not treat this as fatal, since the channel worker is fully correct,
/// just not real-time-scheduled, without it.
pub fn raise_to_realtime(priority: i32) {
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: `param` is a valid, fully-initialized `sched_param`;
        // passing `0` for the pid targets the calling thread.
        let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if result != 0 {
            let errno = std::io::Error::last_os_error();
            warn!(
                "failed to raise channel worker to SCHED_FIFO priority {}: {} (continuing at default priority)",
                priority, errno
            );
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!(
            "real-time scheduling hints are only implemented on Linux; \
             running channel worker at default priority {}",
            priority
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_priority_never_panics() {
        // Most CI sandboxes deny CAP_SYS_NICE; this call must degrade to
        // a logged warning, never a panic or process abort.
        raise_to_realtime(10);
    }
}
