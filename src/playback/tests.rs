use super::*;
use crate::audio::{AudioContextSlot, AudioSource, NodeState, OfflineContext};
use crate::audio::AudioContext;
use crate::error::SightSingError;
use crate::musicxml::parse;
use crate::score::ParsedScore;

fn scheduler() -> PlaybackScheduler<OfflineContext> {
    PlaybackScheduler::with_seed(AudioContextSlot::new(|| Ok(OfflineContext::new(8_000))), 1)
}

fn context(scheduler: &PlaybackScheduler<OfflineContext>) -> &OfflineContext {
    scheduler.audio().get().unwrap()
}

fn advance(scheduler: &mut PlaybackScheduler<OfflineContext>, seconds: f64) {
    scheduler.audio_mut().get_mut().unwrap().advance(seconds);
}

fn tone_starts(ctx: &OfflineContext) -> Vec<f64> {
    ctx.nodes()
        .iter()
        .filter(|n| matches!(n.source, AudioSource::Tone(_)))
        .map(|n| n.start)
        .collect()
}

fn click_gains(ctx: &OfflineContext) -> Vec<f32> {
    ctx.nodes()
        .iter()
        .filter_map(|n| match n.source {
            AudioSource::Buffer { gain, .. } => Some(gain),
            AudioSource::Tone(_) => None,
        })
        .collect()
}

fn score_xml(beats: u32, beat_type: u32, measures: usize) -> String {
    let mut xml = String::from("<score-partwise><part id=\"P1\">");
    for m in 0..measures {
        xml.push_str(&format!("<measure number=\"{}\">", m + 1));
        if m == 0 {
            xml.push_str(&format!(
                "<attributes><divisions>2</divisions><time><beats>{}</beats><beat-type>{}</beat-type></time></attributes>",
                beats, beat_type
            ));
        }
        let note_ticks = 8 / beat_type;
        for _ in 0..beats {
            xml.push_str(&format!(
                "<note><pitch><step>G</step><octave>4</octave></pitch><duration>{}</duration></note>",
                note_ticks
            ));
        }
        xml.push_str("</measure>");
    }
    xml.push_str("</part></score-partwise>");
    xml
}

#[test]
fn test_count_in_offsets_first_note() {
    let mut scheduler = scheduler();
    let score = ParsedScore::fallback();
    let report = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();

    assert_eq!(report.start_time, 0.0);
    assert_eq!(tone_starts(context(&scheduler))[0], 2.0);
}

#[test]
fn test_count_in_uses_session_start_snapshot() {
    let mut scheduler = scheduler();
    let score = ParsedScore::fallback();
    let settings = SoundSettings::default();
    scheduler
        .play_score(&score, PlaybackMode::PitchOnly, &settings)
        .unwrap();
    scheduler.stop();
    advance(&mut scheduler, 3.25);

    let report = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &settings)
        .unwrap();
    assert_eq!(report.start_time, 3.25);

    let starts = tone_starts(context(&scheduler));
    // The first four tones belong to the earlier pitch-only session
    assert_eq!(starts[4], 5.25);
    assert_eq!(starts[7], 6.75);
}

#[test]
fn test_second_play_cancels_first_session() {
    let mut scheduler = scheduler();
    let score = ParsedScore::fallback();
    let settings = SoundSettings::default();

    let first = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &settings)
        .unwrap();
    let first_nodes = first.click_count + first.note_count;
    advance(&mut scheduler, 0.01);
    scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &settings)
        .unwrap();

    let ctx = context(&scheduler);
    for node in &ctx.nodes()[..first_nodes] {
        let state = node.state_at(ctx.current_time());
        assert!(
            matches!(
                state,
                NodeState::Cancelled | NodeState::Stopped | NodeState::Finished
            ),
            "node {:?} is still {:?}",
            node.id,
            state
        );
    }
    let live: Vec<_> = ctx.live_nodes().map(|n| n.id).collect();
    assert_eq!(live.len(), ctx.nodes().len() - first_nodes);
    assert!(live.iter().all(|id| id.0 as usize >= first_nodes));
}

#[test]
fn test_stop_is_idempotent() {
    let mut scheduler = scheduler();
    scheduler.stop();
    assert!(!scheduler.is_playing());

    scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::ClickOnly, &SoundSettings::default())
        .unwrap();
    scheduler.stop();
    scheduler.stop();
    assert!(!scheduler.is_playing());
    assert_eq!(context(&scheduler).live_nodes().count(), 0);
}

#[test]
fn test_auto_stop_after_melody_plus_buffer() {
    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();
    // Count-in 2.0 + melody 2.0 + 1.0
    assert_eq!(report.stop_at, 5.0);

    advance(&mut scheduler, 4.9);
    assert!(scheduler.poll());
    assert!(scheduler.session().unwrap().tracked_nodes().is_empty());

    advance(&mut scheduler, 0.2);
    assert!(!scheduler.poll());
    assert!(!scheduler.is_playing());
}

#[test]
fn test_poll_releases_finished_nodes() {
    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::PitchOnly, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.stop_at, 3.0);

    advance(&mut scheduler, 1.0);
    assert!(scheduler.poll());
    assert_eq!(scheduler.session().unwrap().tracked_nodes().len(), 2);
    assert_eq!(scheduler.next_timer(), Some(1.5));
}

#[test]
fn test_pitch_only_has_no_clicks_and_no_offset() {
    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::PitchOnly, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.click_count, 0);
    assert_eq!(report.melody_offset, 0.0);
    assert!(click_gains(context(&scheduler)).is_empty());
    assert_eq!(tone_starts(context(&scheduler))[0], 0.0);
}

#[test]
fn test_click_only_covers_count_in_and_measures() {
    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::ClickOnly, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.note_count, 0);
    assert_eq!(report.click_count, 8);
    // No melody offset without a melody: 2.0 + 1.0
    assert_eq!(report.stop_at, 3.0);

    let gains = click_gains(context(&scheduler));
    let accented: Vec<usize> = gains
        .iter()
        .enumerate()
        .filter(|(_, g)| **g > 0.2)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(accented, vec![0, 4]);
}

#[test]
fn test_compound_meter_counts_in_quarters() {
    let score = parse(&score_xml(6, 8, 2), 120.0);
    assert_eq!(score.total_duration, 3.0);
    assert_eq!(score.intro_duration(), 3.0);

    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.click_count, 18);
    assert_eq!(report.melody_offset, 3.0);
    assert_eq!(report.stop_at, 7.0);

    let ctx = context(&scheduler);
    let clicks: Vec<f64> = ctx
        .nodes()
        .iter()
        .filter(|n| matches!(n.source, AudioSource::Buffer { .. }))
        .map(|n| n.start)
        .collect();
    assert_eq!(clicks[1], 0.5);
    assert_eq!(clicks[6], 3.0);
    assert_eq!(tone_starts(ctx)[0], 3.0);
}

#[test]
fn test_trailing_rest_does_not_extend_auto_stop() {
    let xml = "<score-partwise><part id=\"P1\"><measure number=\"1\">\
        <attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>\
        <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration></note>\
        <note><rest/><duration>3</duration></note>\
        </measure></part></score-partwise>";
    let score = parse(xml, 120.0);
    assert_eq!(score.total_duration, 0.5);

    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.click_count, 8);
    assert_eq!(report.stop_at, 3.5);

    advance(&mut scheduler, 3.6);
    assert!(!scheduler.poll());
    assert_eq!(context(&scheduler).live_nodes().count(), 0);
}

#[test]
fn test_three_four_count_in() {
    let score = parse(&score_xml(3, 4, 4), 90.0);
    let mut scheduler = scheduler();
    let report = scheduler
        .play_score(&score, PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();
    assert_eq!(report.click_count, 15);
    assert!((report.melody_offset - 2.0).abs() < 1e-9);
}

#[test]
fn test_locked_context_is_surfaced() {
    let mut scheduler =
        PlaybackScheduler::with_seed(AudioContextSlot::new(|| Ok(OfflineContext::locked(8_000))), 1);
    let result = scheduler.play_score(
        &ParsedScore::fallback(),
        PlaybackMode::ClickAndScore,
        &SoundSettings::default(),
    );
    assert!(matches!(result, Err(SightSingError::AudioContext(_))));
    assert!(!scheduler.is_playing());
}

#[test]
fn test_close_releases_context() {
    let mut scheduler = scheduler();
    scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::ClickAndScore, &SoundSettings::default())
        .unwrap();
    scheduler.close();
    assert!(!scheduler.is_playing());
    assert!(scheduler.audio().get().is_none());
}

#[test]
fn test_sound_settings_select_timbre() {
    let mut scheduler = scheduler();
    let settings = SoundSettings {
        notes: crate::audio::NoteSound::Xylophone,
        ..SoundSettings::default()
    };
    scheduler
        .play_score(&ParsedScore::fallback(), PlaybackMode::PitchOnly, &settings)
        .unwrap();
    let ctx = context(&scheduler);
    match &ctx.nodes()[0].source {
        AudioSource::Tone(spec) => {
            assert_eq!(spec.waveform, crate::audio::Waveform::Square);
            assert!((spec.gain - 0.24).abs() < 1e-9);
        }
        other => panic!("expected a tone, got {:?}", other),
    }
}
