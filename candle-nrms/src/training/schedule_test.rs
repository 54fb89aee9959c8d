//! Tests for the linear warmup schedule

use super::schedule::*;
use rstest::*;

/// Test learning rates across warmup, decay and completion
#[rstest]
#[case(0, 0.0)]
#[case(1, 0.5)]
#[case(2, 1.0)]
#[case(6, 0.5)]
#[case(9, 0.125)]
#[case(10, 0.0)]
#[case(15, 0.0)]
fn test_lr_at(#[case] step: usize, #[case] expected: f64) {
    let schedule = LinearWarmupSchedule::new(1.0, 0.2, 10);
    assert_eq!(schedule.warmup_steps(), 2);
    assert!((schedule.lr_at(step) - expected).abs() < 1e-12, "lr_at({})", step);
}

/// Test warmup length floors the fraction
#[rstest]
#[case(0.1, 25, 2)]
#[case(0.0, 25, 0)]
#[case(1.0, 8, 8)]
#[case(0.5, 0, 0)]
fn test_warmup_steps(#[case] fraction: f64, #[case] total: usize, #[case] expected: usize) {
    assert_eq!(LinearWarmupSchedule::new(1e-3, fraction, total).warmup_steps(), expected);
}

/// Test no warmup starts at the peak rate
#[rstest]
fn test_no_warmup_starts_at_peak() {
    let schedule = LinearWarmupSchedule::new(2e-4, 0.0, 4);
    assert_eq!(schedule.current_lr(), 2e-4);
    assert_eq!(schedule.phase(), SchedulePhase::Decay);
}

/// Test advancing walks through every phase
#[rstest]
fn test_advance_phases() {
    let mut schedule = LinearWarmupSchedule::new(1.0, 0.5, 4);
    assert_eq!(schedule.phase(), SchedulePhase::Warmup);
    assert_eq!(schedule.current_lr(), 0.0);

    assert_eq!(schedule.advance(), 0.5);
    assert_eq!(schedule.phase(), SchedulePhase::Warmup);
    assert_eq!(schedule.advance(), 1.0);
    assert_eq!(schedule.phase(), SchedulePhase::Decay);
    assert_eq!(schedule.advance(), 0.5);
    assert_eq!(schedule.advance(), 0.0);
    assert_eq!(schedule.phase(), SchedulePhase::Done);
    assert_eq!(schedule.step(), 4);
    assert_eq!(schedule.advance(), 0.0);
}

/// Test the rate never exceeds the peak
#[rstest]
fn test_lr_bounded_by_peak() {
    let schedule = LinearWarmupSchedule::new(3e-4, 0.1, 137);
    assert_eq!(schedule.peak_lr(), 3e-4);
    assert_eq!(schedule.total_steps(), 137);
    for s in 0..150 {
        let lr = schedule.lr_at(s);
        assert!((0.0..=3e-4).contains(&lr), "lr_at({}) = {}", s, lr);
    }
}

/// Test skipping ahead resumes at the matching rate
#[rstest]
fn test_skip_to_matches_advanced_schedule() {
    let mut advanced = LinearWarmupSchedule::new(1e-3, 0.25, 8);
    for _ in 0..5 {
        advanced.advance();
    }
    let mut resumed = LinearWarmupSchedule::new(1e-3, 0.25, 8);
    resumed.skip_to(5);
    assert_eq!(resumed.step(), 5);
    assert_eq!(resumed.current_lr(), advanced.current_lr());
    assert_eq!(resumed.phase(), SchedulePhase::Decay);

    resumed.skip_to(12);
    assert_eq!(resumed.phase(), SchedulePhase::Done);
    assert_eq!(resumed.current_lr(), 0.0);
}
