//! S7: relay auto-tuning against an emulated first-order-plus-delay
//! plant, including the operator gain-apply handoff.

use std::collections::VecDeque;
use std::sync::Arc;
use tagrun::model::{
    PidConfig, PidGains, PointSample, SourceRef, TuningSession, TuningStatus,
};
use tagrun::processors::PidProcessor;
use tagrun::repo::{ConfigRepository, MemoryHistorian, MemoryRepository};
use tagrun::scheduler::Processor;
use tagrun::store::PointStore;
use tagrun::time::{Clock, ManualClock};
use tagrun::{EngineContext, EngineSettings, Supervisor};

/// First-order plant with dead time, stepped at 1 Hz like the engine
struct Plant {
    gain: f64,
    time_constant: f64,
    value: f64,
    delay_line: VecDeque<f64>,
}

impl Plant {
    fn new(gain: f64, time_constant: f64, delay_seconds: usize, initial: f64) -> Self {
        Self {
            gain,
            time_constant,
            value: initial,
            delay_line: std::iter::repeat(initial / gain)
                .take(delay_seconds)
                .collect(),
        }
    }

    fn step(&mut self, input: f64) -> f64 {
        self.delay_line.push_back(input);
        let delayed = self.delay_line.pop_front().unwrap_or(input);
        self.value += (self.gain * delayed - self.value) / self.time_constant;
        self.value
    }
}

/// Independent reference measurement of the limit cycle: strict local
/// extrema over the recorded trace.
fn reference_cycle(trace: &[(i64, f64)], cycles: usize) -> Option<(f64, f64)> {
    let mut peaks = Vec::new();
    let mut troughs = Vec::new();
    for window in trace.windows(3) {
        let [(_, a), (t, b), (_, c)] = [window[0], window[1], window[2]];
        if a < b && b >= c {
            peaks.push((t, b));
        } else if a > b && b <= c {
            troughs.push((t, b));
        }
    }
    if peaks.len() < cycles + 1 || troughs.len() < cycles {
        return None;
    }
    let recent = &peaks[peaks.len() - (cycles + 1)..];
    let pu = recent
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) as f64)
        .sum::<f64>()
        / cycles as f64;
    let peak_mean = recent[1..].iter().map(|(_, v)| v).sum::<f64>() / cycles as f64;
    let trough_mean = troughs[troughs.len() - cycles..]
        .iter()
        .map(|(_, v)| v)
        .sum::<f64>()
        / cycles as f64;
    Some((pu, peak_mean - trough_mean))
}

fn pid_config() -> PidConfig {
    PidConfig {
        id: "loop1".into(),
        enabled: true,
        interval: 1.0,
        input_point_id: "pv".into(),
        output_point_id: "cv".into(),
        set_point: SourceRef::Point("sp".into()),
        is_auto: None,
        manual_value: None,
        reverse_output: None,
        gains: PidGains {
            kp: 1.0,
            ki: 0.05,
            kd: 0.0,
        },
        out_min: 0.0,
        out_max: 100.0,
        feed_forward: 0.0,
        derivative_filter_alpha: 0.0,
        max_output_slew_rate: None,
        dead_zone: 0.0,
        cascade_level: 0,
        parent_id: None,
        digital: None,
        output_duration_seconds: 0,
    }
}

fn session(start_unix: i64) -> TuningSession {
    TuningSession {
        pid_id: "loop1".into(),
        start_unix,
        status: TuningStatus::Initializing,
        relay_amplitude_percent: 10.0,
        hysteresis: 0.5,
        min_cycles: 4,
        max_cycles: 100,
        timeout_seconds: 3_600,
        max_amplitude: 50.0,
        original_gains: PidGains {
            kp: 1.0,
            ki: 0.05,
            kd: 0.0,
        },
        calculated: None,
        diagnostic: None,
    }
}

#[tokio::test]
async fn s7_relay_tuning_converges_within_reference_tolerance() {
    let repo = Arc::new(MemoryRepository::new());
    repo.set_pid_memories(vec![pid_config()]);
    let clock = Arc::new(ManualClock::starting_at(50_000));
    let ctx = EngineContext::new(
        repo.clone(),
        Arc::new(MemoryHistorian::new()),
        Arc::new(PointStore::ephemeral().unwrap()),
        clock.clone(),
        EngineSettings::default(),
    );
    repo.insert_tuning_session(session(clock.now_unix()));
    let processor = PidProcessor::new();

    ctx.store
        .set_final(&PointSample::new("sp", "50", clock.now_unix()))
        .unwrap();

    let mut plant = Plant::new(1.0, 10.0, 2, 50.0);
    let mut pv = 50.0;
    let mut trace: Vec<(i64, f64)> = Vec::new();
    let mut final_status = TuningStatus::Initializing;
    for _ in 0..600 {
        ctx.store
            .set_final(&PointSample::new("pv", format!("{pv}"), clock.now_unix()))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        let status = repo.tuning_session("loop1").unwrap().status;
        if !status.is_active() {
            final_status = status;
            break;
        }
        let output = ctx
            .store
            .raw("cv")
            .and_then(|s| s.numeric())
            .unwrap_or(50.0);
        pv = plant.step(output);
        trace.push((clock.now_unix(), pv));
        clock.advance(1);
    }

    assert_eq!(final_status, TuningStatus::Completed);
    let result = repo
        .tuning_session("loop1")
        .unwrap()
        .calculated
        .expect("completed session carries calculated gains");
    assert!(result.ku > 0.0);
    assert!(result.pu > 0.0);

    // reference from an independent read of the same oscillation
    let (ref_pu, ref_amplitude) =
        reference_cycle(&trace, 4).expect("reference extrema detectable");
    let ref_ku = 4.0 * 10.0 / (std::f64::consts::PI * ref_amplitude);
    assert!(
        (result.pu - ref_pu).abs() / ref_pu <= 0.15,
        "Pu {} vs reference {ref_pu}",
        result.pu
    );
    assert!(
        (result.ku - ref_ku).abs() / ref_ku <= 0.15,
        "Ku {} vs reference {ref_ku}",
        result.ku
    );

    // Ziegler–Nichols classic shape
    let gains = result.gains;
    assert!((gains.kp - 0.6 * result.ku).abs() < 1e-9);
    assert!((gains.ki - 2.0 * gains.kp / result.pu).abs() < 1e-9);
    assert!((gains.kd - gains.kp * result.pu / 8.0).abs() < 1e-9);
}

#[tokio::test]
async fn operator_apply_copies_gains_and_drops_the_checkpoint() {
    let repo = Arc::new(MemoryRepository::new());
    repo.set_pid_memories(vec![pid_config()]);
    let clock = Arc::new(ManualClock::starting_at(80_000));
    let ctx = EngineContext::new(
        repo.clone(),
        Arc::new(MemoryHistorian::new()),
        Arc::new(PointStore::ephemeral().unwrap()),
        clock.clone(),
        EngineSettings::default(),
    );
    let processor = PidProcessor::new();

    // a few normal ticks leave a checkpoint behind
    ctx.store
        .set_final(&PointSample::new("sp", "50", clock.now_unix()))
        .unwrap();
    for _ in 0..3 {
        ctx.store
            .set_final(&PointSample::new("pv", "45", clock.now_unix()))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        clock.advance(1);
    }
    assert!(ctx.store.pid_state("loop1").is_some());

    let mut completed = session(clock.now_unix());
    completed.status = TuningStatus::Completed;
    completed.calculated = Some(tagrun::model::TuningResult {
        ku: 3.0,
        pu: 12.0,
        gains: PidGains {
            kp: 1.8,
            ki: 0.3,
            kd: 2.7,
        },
    });
    repo.insert_tuning_session(completed);

    let supervisor = Supervisor::new(ctx);
    let gains = supervisor.apply_tuned_gains("loop1").await.unwrap();
    assert_eq!(gains.kp, 1.8);
    let stored = repo.pid_memories().await.unwrap();
    assert_eq!(stored[0].gains.kp, 1.8);
    assert!(supervisor.context().store.pid_state("loop1").is_none());
}
