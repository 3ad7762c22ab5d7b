//! End-to-end behavior of the registry and graph nodes on the null backend.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use soundcard_core::{
    Bufferizer, Capabilities, Filter, MixerElement, NullCardSpec, NullDriver, SharedFilter, SoundCardError,
    SoundCardManager, StreamConfiguration, TickContext, Ticker,
};

const CTX: TickContext = TickContext {
    tick: 0,
    interval: Duration::from_millis(10),
};

/// 10 ms at 8000 Hz mono 16-bit.
const TICK: usize = 160;

fn manager_with(specs: Vec<NullCardSpec>) -> (SoundCardManager, Arc<NullDriver>) {
    let manager = SoundCardManager::new();
    let driver = Arc::new(NullDriver::with_cards(specs));
    manager.register_descriptor(driver.clone()).unwrap();
    (manager, driver)
}

#[test]
fn fifo_reads_are_exact_prefixes() {
    let mut fifo = Bufferizer::new();
    let writes: [&[u8]; 4] = [&[1, 2, 3], &[], &[4], &[5, 6, 7, 8, 9]];
    let mut all = Vec::new();
    for w in writes {
        fifo.put(w);
        all.extend_from_slice(w);
    }

    let mut first = [0u8; 5];
    assert!(fifo.read(&mut first));
    assert_eq!(&first[..], &all[..5]);
    let mut rest = [0u8; 4];
    assert!(fifo.read(&mut rest));
    assert_eq!(&rest[..], &all[5..]);
}

#[test]
fn short_read_leaves_fifo_untouched() {
    let mut fifo = Bufferizer::new();
    fifo.put(&[1, 2, 3]);
    let before = fifo.available();

    let mut out = [0u8; 4];
    assert!(!fifo.read(&mut out));
    assert_eq!(fifo.available(), before);
    assert_eq!(fifo.read_vec(3), Some(vec![1, 2, 3]));
}

#[test]
fn lookups_survive_reload() {
    let (manager, _) = manager_with(vec![
        NullCardSpec::duplex("a"),
        NullCardSpec::capture_only("b"),
        NullCardSpec::playback_only("c"),
    ]);
    let ids: Vec<String> = manager.list().into_iter().map(|c| c.id).collect();
    for id in &ids {
        assert_eq!(manager.get_card(Some(id.as_str())).unwrap().id(), id);
    }

    manager.reload();
    for id in &ids {
        assert_eq!(manager.get_card(Some(id.as_str())).unwrap().id(), id);
    }
}

#[test]
fn defaults_honor_capability_bits() {
    let (manager, _) = manager_with(vec![
        NullCardSpec::playback_only("spk"),
        NullCardSpec::new("off", Capabilities::DISABLED),
        NullCardSpec::capture_only("mic"),
    ]);
    let capture = manager.get_default_capture_card().unwrap();
    assert!(capture.capabilities().contains(Capabilities::CAPTURE));
    let playback = manager.get_default_playback_card().unwrap();
    assert!(playback.capabilities().contains(Capabilities::PLAYBACK));
}

#[test]
fn starved_writer_emits_one_tick_of_silence() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card = manager.get_card(None).unwrap();
    let mut writer = card.create_writer().unwrap();
    writer.preprocess(&CTX).unwrap();

    writer.process(&CTX);
    writer.process(&CTX);

    let played = NullDriver::tap(&card).unwrap().played();
    assert_eq!(played, vec![vec![0u8; TICK]; 2]);
}

#[test]
fn reader_overflow_discards_oldest() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card = manager.get_card(None).unwrap();
    let mut reader = card.create_reader().unwrap();
    reader.preprocess(&CTX).unwrap();
    let tap = NullDriver::tap(&card).unwrap();

    // six ticks while the ticker is stalled, threshold is four
    for i in 0..6u8 {
        assert!(tap.inject(&[i; TICK]));
    }
    let before = reader.buffered();
    reader.process(&CTX);

    let out = reader.output().drain();
    assert_eq!(out, vec![vec![5u8; TICK]]);
    assert!(reader.buffered() <= TICK);
    assert!(reader.buffered() < before - TICK);
    assert_eq!(reader.stats().discarded_bytes, 5 * TICK as u64);
}

#[test]
fn reader_below_threshold_keeps_everything() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card = manager.get_card(None).unwrap();
    let mut reader = card.create_reader().unwrap();
    reader.preprocess(&CTX).unwrap();
    let tap = NullDriver::tap(&card).unwrap();

    for i in 0..4u8 {
        tap.inject(&[i; TICK]);
    }
    reader.process(&CTX);

    let out = reader.output().drain();
    assert_eq!(out.len(), 4);
    assert_eq!(out[0], vec![0u8; TICK]);
    assert_eq!(reader.stats().discarded_bytes, 0);
}

#[test]
fn duplicate_is_independent() {
    let (manager, driver) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card1 = manager.get_card(None).unwrap();
    card1.set_level(MixerElement::Master, 30).unwrap();

    let card2 = card1.dup().unwrap();
    assert_eq!(card2.id(), card1.id());
    assert_eq!(card2.get_level(MixerElement::Master), Ok(30));

    card2.set_level(MixerElement::Master, 90).unwrap();
    assert_eq!(card1.get_level(MixerElement::Master), Ok(30));

    assert_eq!(driver.live_cards(), 2);
    drop(card2);
    assert_eq!(driver.live_cards(), 1);
    assert_eq!(card1.get_level(MixerElement::Master), Ok(30));

    // the original still opens
    let mut reader = card1.create_reader().unwrap();
    assert!(reader.preprocess(&CTX).is_ok());
}

#[test]
fn duplicate_streams_open_side_by_side() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card1 = manager.get_card(None).unwrap();
    let card2 = Arc::new(card1.dup().unwrap());

    let mut r1 = card1.create_reader().unwrap();
    let mut r2 = card2.create_reader().unwrap();
    assert!(r1.preprocess(&CTX).is_ok());
    assert!(r2.preprocess(&CTX).is_ok());
}

#[test]
fn writer_plays_queued_ticks_then_silence() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("null")]);
    let card = manager.get_card(None).unwrap();
    let config = StreamConfiguration {
        sample_rate: 8000,
        channels: 1,
        ..StreamConfiguration::default()
    };
    let mut writer = card.create_writer_with(config).unwrap();
    writer.preprocess(&CTX).unwrap();
    assert_eq!(writer.tick_bytes(), TICK);

    let ticks: Vec<Vec<u8>> = (1..=3u8)
        .map(|t| (0..TICK).map(|i| t.wrapping_mul(i as u8 | 1)).collect())
        .collect();
    for tick in &ticks {
        writer.input().put(tick.clone());
    }
    for _ in 0..5 {
        writer.process(&CTX);
    }

    let played = NullDriver::tap(&card).unwrap().played();
    assert_eq!(played.len(), 5);
    assert_eq!(&played[..3], &ticks[..]);
    assert_eq!(played[3], vec![0u8; TICK]);
    assert_eq!(played[4], vec![0u8; TICK]);
}

#[test]
fn ticker_moves_audio_from_reader_to_writer() {
    let (manager, _) = manager_with(vec![NullCardSpec::capture_only("mic"), NullCardSpec::playback_only("spk")]);
    let mic = manager.get_default_capture_card().unwrap();
    let spk = manager.get_default_playback_card().unwrap();

    let reader = mic.create_reader().unwrap();
    let writer = spk.create_writer().unwrap();
    let captured = reader.output();
    let playback_in = writer.input();

    let reader = Arc::new(Mutex::new(reader));
    let writer = Arc::new(Mutex::new(writer));
    let ticker = Ticker::new(Duration::from_millis(10));
    ticker.attach(reader.clone() as SharedFilter).unwrap();
    ticker.attach(writer.clone() as SharedFilter).unwrap();

    let mic_tap = NullDriver::tap(&mic).unwrap();
    mic_tap.inject(&[7; TICK]);
    ticker.tick_once();
    // link the queues the way a relay filter would
    for buffer in captured.drain() {
        playback_in.put(buffer);
    }
    ticker.tick_once();

    let played = NullDriver::tap(&spk).unwrap().played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0], vec![0u8; TICK]);
    assert_eq!(played[1], vec![7u8; TICK]);
}

#[test]
fn busy_device_fails_at_preprocess() {
    let (manager, _) = manager_with(vec![NullCardSpec::duplex("n")]);
    let card = manager.get_card(None).unwrap();
    let mut first = card.create_writer().unwrap();
    first.preprocess(&CTX).unwrap();

    let second: SharedFilter = Arc::new(Mutex::new(card.create_writer().unwrap()));
    let ticker = Ticker::new(Duration::from_millis(10));
    let err = ticker.attach(second).unwrap_err();
    assert!(matches!(err, SoundCardError::DeviceBusy(_)));

    // the inert node ticks harmlessly
    ticker.tick_once();
    first.process(&CTX);
    assert_eq!(NullDriver::tap(&card).unwrap().played().len(), 1);
}

#[test]
fn open_stream_keeps_removed_card_alive() {
    let (manager, driver) = manager_with(vec![NullCardSpec::duplex("usb")]);
    let mut reader = manager.create_reader("Null: usb").unwrap();
    reader.preprocess(&CTX).unwrap();

    driver.unplug("usb");
    assert!(manager.reload_if_changed());
    assert!(manager.get_card(Some("Null: usb")).is_none());
    assert_eq!(driver.live_cards(), 1);

    let tap = NullDriver::tap(reader.card()).unwrap();
    tap.inject(&[3; TICK]);
    reader.process(&CTX);
    assert_eq!(reader.output().drain(), vec![vec![3u8; TICK]]);

    drop(reader);
    assert_eq!(driver.live_cards(), 0);
}
