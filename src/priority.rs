// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for device callback threads when AQTOOLS_THREAD_PRIORITY
/// is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Scheduling setup for a device callback thread. The backend owns the
/// thread, so the priority is applied from inside the first callback
/// invocation rather than at stream construction. The environment is read
/// once when the callback is built, never in the hot path.
///
/// AQTOOLS_THREAD_PRIORITY (0-99) overrides the priority. RT (SCHED_FIFO)
/// scheduling is attempted by default on unix; AQTOOLS_DISABLE_RT_AUDIO=1
/// opts out.
pub struct CallbackPriority {
    priority: ThreadPriority,
    rt_audio: bool,
    applied: bool,
}

impl CallbackPriority {
    pub fn from_env() -> CallbackPriority {
        let requested = std::env::var("AQTOOLS_THREAD_PRIORITY")
            .ok()
            .and_then(|value| value.parse::<u8>().ok())
            .filter(|&value| value < 100)
            .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
        let priority = match ThreadPriorityValue::try_from(requested) {
            Ok(value) => ThreadPriority::Crossplatform(value),
            Err(_) => ThreadPriority::Max,
        };

        CallbackPriority {
            priority,
            rt_audio: !env_flag("AQTOOLS_DISABLE_RT_AUDIO"),
            applied: false,
        }
    }

    /// Applies the priority to the current thread. Only the first call does
    /// anything.
    pub fn apply(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;

        let priority = self.priority;
        let _ = set_current_thread_priority(priority);

        #[cfg(unix)]
        if self.rt_audio {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                priority,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => {
                    info!("Enabled RT SCHED_FIFO for device callback thread");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Failed to set RT SCHED_FIFO for device callback thread"
                    );
                }
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            value == "1"
                || value.eq_ignore_ascii_case("true")
                || value.eq_ignore_ascii_case("yes")
                || value.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::CallbackPriority;

    #[test]
    fn test_apply_is_idempotent() {
        let mut priority = CallbackPriority::from_env();
        assert!(!priority.applied);
        priority.apply();
        assert!(priority.applied);
        // A second call is a no-op.
        priority.apply();
        assert!(priority.applied);
    }
}
