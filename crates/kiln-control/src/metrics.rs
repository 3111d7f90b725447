// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource manager metrics, registered once under the `rm` namespace.

use kiln_core::event::ControlEvent;
use kiln_core::telemetry::MetricsResult;
use kiln_telemetry::{CounterHandle, MetricsRegistry, PeriodHandle, SampleHandle};
use std::time::Duration;

pub(crate) const NAMESPACE: &str = "rm";

pub(crate) fn count(counter: &CounterHandle) {
    if let Err(e) = counter.increment() {
        log::warn!("RM: failed to update {}: {}", counter.id(), e);
    }
}

pub(crate) fn tick(period: &PeriodHandle) {
    if let Err(e) = period.tick() {
        log::warn!("RM: failed to update {}: {}", period.id(), e);
    }
}

pub(crate) fn observe(sample: &SampleHandle, elapsed: Duration) {
    if let Err(e) = sample.observe_duration(elapsed) {
        log::warn!("RM: failed to update {}: {}", sample.id(), e);
    }
}

/// Per-event-kind handles. Exit and abort are not tracked individually.
#[derive(Debug, Clone)]
struct PerEvent {
    count: CounterHandle,
    time: SampleHandle,
    period: PeriodHandle,
}

/// Event dispatch metrics.
#[derive(Debug, Clone)]
pub(crate) struct EventMetrics {
    total: CounterHandle,
    time: SampleHandle,
    period: PeriodHandle,
    per_event: Vec<Option<PerEvent>>,
}

fn tracked(event: ControlEvent) -> bool {
    !matches!(event, ControlEvent::Exit | ControlEvent::Abort)
}

fn describe(event: ControlEvent) -> &'static str {
    match event {
        ControlEvent::ExcStart => "START",
        ControlEvent::ExcStop => "STOP",
        ControlEvent::PlatformChange => "PLATFORM",
        ControlEvent::OptimizeRequest => "OPTIMIZE",
        ControlEvent::User1 => "USR1",
        ControlEvent::User2 => "USR2",
        ControlEvent::Exit => "EXIT",
        ControlEvent::Abort => "ABORT",
    }
}

impl EventMetrics {
    pub(crate) fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        let mut per_event = Vec::with_capacity(ControlEvent::COUNT);
        for event in ControlEvent::ALL {
            if !tracked(event) {
                per_event.push(None);
                continue;
            }
            let tag = event.tag();
            let what = describe(event);
            per_event.push(Some(PerEvent {
                count: registry.register_counter(
                    NAMESPACE,
                    format!("evt.{}", tag),
                    format!("{} events", what),
                )?,
                time: registry.register_sample(
                    NAMESPACE,
                    format!("evt.avg.{}", tag),
                    format!("Avg {} events processing t[ms]", what),
                    "ms",
                )?,
                period: registry.register_period(
                    NAMESPACE,
                    format!("evt.per.{}", tag),
                    format!("Avg {} events period t[ms]", what),
                )?,
            }));
        }

        Ok(Self {
            total: registry.register_counter(NAMESPACE, "evt.tot", "Total events")?,
            time: registry.register_sample(
                NAMESPACE,
                "evt.avg.time",
                "Avg events processing t[ms]",
                "ms",
            )?,
            period: registry.register_period(NAMESPACE, "evt.per", "Avg events period t[ms]")?,
            per_event,
        })
    }

    /// Accounts for one consumed event, before its handler runs.
    pub(crate) fn on_dispatch(&self, event: ControlEvent) {
        count(&self.total);
        tick(&self.period);
        if let Some(Some(m)) = self.per_event.get(event.index()) {
            count(&m.count);
            tick(&m.period);
        }
    }

    /// Accounts for the processing time of one handler.
    pub(crate) fn on_handled(&self, event: ControlEvent, elapsed: Duration) {
        observe(&self.time, elapsed);
        if let Some(Some(m)) = self.per_event.get(event.index()) {
            observe(&m.time, elapsed);
        }
    }
}

/// Optimization cycle metrics.
#[derive(Debug, Clone)]
pub(crate) struct CycleMetrics {
    pub(crate) sch_total: CounterHandle,
    pub(crate) sch_failed: CounterHandle,
    pub(crate) sch_delayed: CounterHandle,
    pub(crate) sch_empty: CounterHandle,
    pub(crate) sch_period: PeriodHandle,
    pub(crate) syn_total: CounterHandle,
    pub(crate) syn_failed: CounterHandle,
    pub(crate) syn_period: PeriodHandle,
    pub(crate) opt_time: SampleHandle,
}

impl CycleMetrics {
    pub(crate) fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        Ok(Self {
            sch_total: registry.register_counter(
                NAMESPACE,
                "sch.tot",
                "Total Scheduler activations",
            )?,
            sch_failed: registry.register_counter(
                NAMESPACE,
                "sch.failed",
                "Failed Scheduler activations",
            )?,
            sch_delayed: registry.register_counter(
                NAMESPACE,
                "sch.delayed",
                "Delayed Scheduler activations",
            )?,
            sch_empty: registry.register_counter(
                NAMESPACE,
                "sch.empty",
                "Empty Scheduler activations",
            )?,
            sch_period: registry.register_period(
                NAMESPACE,
                "sch.per",
                "Avg Scheduler activation period t[ms]",
            )?,
            syn_total: registry.register_counter(
                NAMESPACE,
                "syn.tot",
                "Total Synchronization activations",
            )?,
            syn_failed: registry.register_counter(
                NAMESPACE,
                "syn.failed",
                "Failed Synchronization activations",
            )?,
            syn_period: registry.register_period(
                NAMESPACE,
                "syn.per",
                "Avg Synchronization activation period t[ms]",
            )?,
            opt_time: registry.register_sample(
                NAMESPACE,
                "opt.avg.time",
                "Avg OPT processing t[ms]",
                "ms",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metrics_registration() {
        let registry = MetricsRegistry::new();
        let metrics = EventMetrics::register(&registry).unwrap();

        metrics.on_dispatch(ControlEvent::OptimizeRequest);
        metrics.on_handled(ControlEvent::OptimizeRequest, Duration::from_millis(2));
        metrics.on_dispatch(ControlEvent::Exit);

        assert_eq!(registry.counter_value(NAMESPACE, "evt.tot"), Some(2));
        assert_eq!(registry.counter_value(NAMESPACE, "evt.opts"), Some(1));
        assert_eq!(registry.counter_value(NAMESPACE, "evt.exit"), None);
        // tot, time, period + 6 tracked kinds x 3
        assert_eq!(registry.metric_count(), 21);
    }

    #[test]
    fn test_cycle_metrics_registration() {
        let registry = MetricsRegistry::new();
        let metrics = CycleMetrics::register(&registry).unwrap();
        count(&metrics.sch_empty);
        assert_eq!(registry.counter_value(NAMESPACE, "sch.empty"), Some(1));
        assert_eq!(registry.counter_value(NAMESPACE, "syn.failed"), Some(0));
    }
}
