//! The real-time sequencer: a scheduler thread that plays a [`Sequence`] into
//! a set of receivers and records incoming messages back into it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use quaver_core::{MetaMessage, MidiMessage, ShortMessage};
use quaver_smf::{MidiEvent, Sequence, Track};

use crate::device::{DeviceRegistry, Receiver, SharedReceiver};
use crate::{Error, Result};

/// Loop count value for endless looping.
pub const LOOP_CONTINUOUSLY: i32 = -1;

/// Microseconds per quarter note at the default 120 BPM.
const DEFAULT_TEMPO_MPQ: f64 = 500_000.0;

/// Sleeps longer than this end with a precise spin instead of an OS wait.
const SPIN_TAIL: Duration = Duration::from_millis(1);

type MetaListener = Box<dyn FnMut(&MetaMessage) + Send>;
type ControllerListener = Box<dyn FnMut(&ShortMessage) + Send>;

/// Handle to a registered event listener, returned by the `add_*_listener`
/// methods and consumed by the matching `remove_*_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    meta: Vec<(u64, MetaListener)>,
    controller: Vec<(u64, Vec<u8>, ControllerListener)>,
}

/// Everything the scheduler thread and the control methods share under the
/// state lock.
struct PlayState {
    sequence: Option<Sequence>,
    /// The merged view of all playable tracks; `None` when it must be rebuilt.
    playing: Option<Vec<MidiEvent>>,
    tempo_mpq: f64,
    loop_count: i32,
    loop_start: i64,
    loop_end: i64,
    tick_position: i64,
    tick_set_at: Instant,
    stopped_at: Instant,
    mute: Vec<bool>,
    solo: Vec<bool>,
    /// Per-track record-enable channel sets; `None` in a set is the
    /// all-channels wildcard.
    record_enable: HashMap<usize, HashSet<Option<u8>>>,
    recording_track: Option<usize>,
    record_start_tick: i64,
    record_start_time: Instant,
}

impl PlayState {
    fn new() -> PlayState {
        let now = Instant::now();
        PlayState {
            sequence: None,
            playing: None,
            tempo_mpq: DEFAULT_TEMPO_MPQ,
            loop_count: 0,
            loop_start: 0,
            loop_end: -1,
            tick_position: 0,
            tick_set_at: now,
            stopped_at: now,
            mute: Vec::new(),
            solo: Vec::new(),
            record_enable: HashMap::new(),
            recording_track: None,
            record_start_tick: 0,
            record_start_time: now,
        }
    }

    /// How many ticks elapse per microsecond of wall time, before the tempo
    /// factor. `NaN` when no sequence is loaded.
    fn ticks_per_micro(&self) -> f64 {
        match &self.sequence {
            None => f64::NAN,
            Some(seq) => {
                let resolution = seq.resolution() as f64;
                match seq.division_type().frames_per_second() {
                    None => resolution / self.tempo_mpq,
                    Some(fps) => fps * resolution / 1_000_000.0,
                }
            }
        }
    }

    /// The current playback position: the last anchored tick plus whatever
    /// wall time has elapsed since it was anchored (frozen at the stop time
    /// while not running).
    fn current_tick(&self, running: bool) -> i64 {
        let tpus = self.ticks_per_micro();
        if tpus.is_nan() {
            return self.tick_position;
        }
        let reference = if running {
            Instant::now()
        } else {
            self.stopped_at
        };
        let elapsed = reference.saturating_duration_since(self.tick_set_at);
        self.tick_position + (elapsed.as_micros() as f64 * tpus) as i64
    }

    /// Anchor the position at `tick` as of now.
    fn anchor_position(&mut self, tick: i64) {
        self.tick_position = tick;
        self.tick_set_at = Instant::now();
    }

    /// Merge every playable track into a single ordered event list.
    ///
    /// A track is playable when it is not muted, not shut out by another
    /// track's solo, and not currently enabled for recording.
    fn rebuild_playing(&mut self) {
        let Some(seq) = &self.sequence else {
            self.playing = None;
            return;
        };
        let any_solo = self.solo.iter().any(|&solo| solo);
        let mut merged = Track::new();
        for (idx, track) in seq.tracks.iter().enumerate() {
            if self.mute.get(idx).copied().unwrap_or(false) {
                continue;
            }
            if any_solo && !self.solo.get(idx).copied().unwrap_or(false) {
                continue;
            }
            if self
                .record_enable
                .get(&idx)
                .map_or(false, |channels| !channels.is_empty())
            {
                continue;
            }
            for event in track {
                merged.add(event.clone());
            }
        }
        merged.sort_events();
        self.playing = Some(merged.into_iter().collect());
    }
}

/// Whether a message should be recorded into a track enabled for `channels`.
///
/// The wildcard (`None` in the set) matches everything; otherwise channel
/// messages must match one of the enabled channels and non-channel messages
/// are always recordable.
fn recordable(message: &MidiMessage, channels: &HashSet<Option<u8>>) -> bool {
    if channels.contains(&None) {
        return true;
    }
    match message.channel() {
        Some(channel) => channels.contains(&Some(channel)),
        None => true,
    }
}

struct Shared {
    open: AtomicBool,
    running: AtomicBool,
    recording: AtomicBool,
    /// Set when the merged view or the position changed behind the worker's
    /// back; the worker responds by rebuilding and silently fast-forwarding.
    needs_refresh: AtomicBool,
    tempo_factor_bits: AtomicU32,
    state: Mutex<PlayState>,
    wake: Condvar,
    receivers: Mutex<Vec<SharedReceiver>>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    fn tempo_factor(&self) -> f32 {
        f32::from_bits(self.tempo_factor_bits.load(Ordering::Relaxed))
    }

    /// Mark the merged view stale and wake the worker.
    fn invalidate(&self, st: &mut PlayState) {
        st.playing = None;
        self.needs_refresh.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    /// Forward a message to every attached receiver.
    ///
    /// Must not be called with the state lock held: receivers are free to
    /// call back into the sequencer.
    fn dispatch(&self, message: &MidiMessage, timestamp: i64) {
        let receivers: Vec<SharedReceiver> = self.receivers.lock().unwrap().clone();
        for receiver in receivers {
            receiver.lock().unwrap().send(message, timestamp);
        }
    }

    /// Fire meta listeners for meta messages and controller listeners for
    /// control changes.
    fn fire_listeners(&self, message: &MidiMessage) {
        let mut listeners = self.listeners.lock().unwrap();
        match message {
            MidiMessage::Meta(meta) => {
                for (_, listener) in listeners.meta.iter_mut() {
                    listener(meta);
                }
            }
            MidiMessage::Short(short) if short.command() == ShortMessage::CONTROL_CHANGE => {
                for (_, controllers, listener) in listeners.controller.iter_mut() {
                    if controllers.is_empty() || controllers.contains(&short.data1()) {
                        listener(short);
                    }
                }
            }
            _ => {}
        }
    }
}

/// The receiver end of the sequencer itself: messages sent here are recorded
/// into the current recording track and fired at the event listeners.
struct SequencerReceiver {
    shared: Weak<Shared>,
}

impl Receiver for SequencerReceiver {
    fn send(&mut self, message: &MidiMessage, _timestamp: i64) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !shared.open.load(Ordering::Acquire) {
            return;
        }
        if shared.recording.load(Ordering::Acquire) {
            let mut st = shared.state.lock().unwrap();
            let tpus = st.ticks_per_micro();
            if let Some(track_idx) = st.recording_track {
                if !tpus.is_nan() {
                    let elapsed_ms = st.record_start_time.elapsed().as_millis() as f64;
                    let tick = st.record_start_tick + (elapsed_ms * 1000.0 * tpus) as i64;
                    if let Some(track) = st
                        .sequence
                        .as_mut()
                        .and_then(|seq| seq.tracks.get_mut(track_idx))
                    {
                        track.add(MidiEvent::new(message.clone(), tick));
                    }
                }
            }
        }
        shared.fire_listeners(message);
    }
}

/// A MIDI sequencer.
///
/// A sequencer owns a [`Sequence`] and a dedicated scheduler thread (spawned
/// by [`open`](Sequencer::open), joined by [`close`](Sequencer::close)) that
/// walks the merged, ordered view of its playable tracks, sleeping out the
/// tempo-scaled gap between events and forwarding each message to the
/// attached receivers. Playback honours tempo change events, the tempo
/// factor, loop points, per-track mute/solo, pause/resume and seeking.
///
/// While recording, an internal receiver (see
/// [`receiver`](Sequencer::receiver)) timestamps every incoming message
/// against the playback position and stages it; stopping the recording merges
/// the staged events into every record-enabled track.
///
/// ```no_run
/// use quaver::{ChannelReceiver, DeviceRegistry, Sequencer};
///
/// let mut sequencer = Sequencer::new(DeviceRegistry::new());
/// let (receiver, messages) = ChannelReceiver::shared();
/// sequencer.add_receiver(receiver);
///
/// sequencer.open().unwrap();
/// sequencer.set_sequence(quaver_smf::load("song.mid").unwrap());
/// sequencer.start().unwrap();
/// for (message, _timestamp) in messages.iter() {
///     println!("played {:02x?}", message.bytes());
/// }
/// ```
pub struct Sequencer {
    shared: Arc<Shared>,
    registry: DeviceRegistry,
    record_receiver: SharedReceiver,
    worker: Option<thread::JoinHandle<()>>,
}

impl Sequencer {
    /// Create a closed sequencer that looks up devices in `registry`.
    pub fn new(registry: DeviceRegistry) -> Sequencer {
        let shared = Arc::new(Shared {
            open: AtomicBool::new(false),
            running: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            needs_refresh: AtomicBool::new(false),
            tempo_factor_bits: AtomicU32::new(1.0f32.to_bits()),
            state: Mutex::new(PlayState::new()),
            wake: Condvar::new(),
            receivers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Listeners::default()),
        });
        let record_receiver: SharedReceiver = Arc::new(Mutex::new(SequencerReceiver {
            shared: Arc::downgrade(&shared),
        }));
        Sequencer {
            shared,
            registry,
            record_receiver,
            worker: None,
        }
    }

    /// The registry this sequencer looks up devices in.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The sequencer's own receiver. Messages sent to it while recording are
    /// recorded; either way they are fired at the registered listeners.
    pub fn receiver(&self) -> SharedReceiver {
        self.record_receiver.clone()
    }

    /// Spawn the scheduler thread. Opening an open sequencer does nothing.
    pub fn open(&mut self) -> Result<()> {
        if self.shared.open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("quaver-sequencer".into())
            .spawn(move || worker_loop(shared))
        {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(_) => {
                self.shared.open.store(false, Ordering::Release);
                Err(Error::Unavailable("failed to spawn scheduler thread"))
            }
        }
    }

    /// Stop playback, shut the scheduler thread down and release all
    /// listeners and receiver connections.
    pub fn close(&mut self) {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.recording.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.receivers.lock().unwrap().clear();
        let mut listeners = self.shared.listeners.lock().unwrap();
        listeners.meta.clear();
        listeners.controller.clear();
    }

    /// `true` between [`open`](Sequencer::open) and
    /// [`close`](Sequencer::close).
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// `true` while playback (or recording playback) is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// `true` while recording.
    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Unavailable("sequencer is not open"))
        }
    }

    /// Replace the sequence. Resets the position to 0 and clears mute, solo
    /// and record-enable state; playback picks the new sequence up at its
    /// next refresh point.
    pub fn set_sequence(&self, sequence: Sequence) {
        let mut st = self.shared.state.lock().unwrap();
        let track_count = sequence.tracks.len();
        st.sequence = Some(sequence);
        st.mute = vec![false; track_count];
        st.solo = vec![false; track_count];
        st.record_enable.clear();
        st.recording_track = None;
        st.anchor_position(0);
        self.shared.invalidate(&mut st);
    }

    /// A copy of the current sequence, including anything recorded into it.
    pub fn sequence(&self) -> Option<Sequence> {
        self.shared.state.lock().unwrap().sequence.clone()
    }

    /// Start playback from the current position.
    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;
        let mut st = self.shared.state.lock().unwrap();
        if st.sequence.is_none() {
            return Err(Error::InvalidData("no sequence loaded"));
        }
        if !self.shared.running.swap(true, Ordering::AcqRel) {
            // Resume from the position playback froze at, mid-gap included
            let frozen = st.current_tick(false);
            st.anchor_position(frozen);
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop playback and recording, keeping the current position.
    ///
    /// If a recording was active its staged events are merged into the
    /// record-enabled tracks, as in [`stop_recording`](Sequencer::stop_recording).
    pub fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        let mut st = self.shared.state.lock().unwrap();
        let was_running = self.shared.running.load(Ordering::Acquire);
        if self.shared.recording.swap(false, Ordering::AcqRel) {
            finish_recording(&mut st, was_running);
            self.shared.invalidate(&mut st);
        }
        if self.shared.running.swap(false, Ordering::AcqRel) {
            st.stopped_at = Instant::now();
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Start recording (and playback).
    ///
    /// A fresh staging track is added to the sequence and enabled for all 16
    /// channels; every message arriving at [`receiver`](Sequencer::receiver)
    /// is stamped with the playback tick it arrived at and staged there.
    pub fn start_recording(&self) -> Result<()> {
        self.ensure_open()?;
        let mut st = self.shared.state.lock().unwrap();
        if st.sequence.is_none() {
            return Err(Error::InvalidData("no sequence loaded"));
        }
        if st.recording_track.is_none() {
            let running = self.shared.running.load(Ordering::Acquire);
            st.record_start_tick = st.current_tick(running);
            st.record_start_time = Instant::now();
            let seq = st.sequence.as_mut().unwrap();
            seq.create_track();
            let track_idx = seq.tracks.len() - 1;
            st.recording_track = Some(track_idx);
            st.record_enable
                .insert(track_idx, (0..16).map(Some).collect());
            self.shared.invalidate(&mut st);
        }
        self.shared.recording.store(true, Ordering::Release);
        if !self.shared.running.swap(true, Ordering::AcqRel) {
            let frozen = st.current_tick(false);
            st.anchor_position(frozen);
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop recording, keeping playback running.
    ///
    /// For every record-enabled track, the events it held inside the recorded
    /// window (for its enabled channels) are replaced by the newly recorded
    /// events for those channels, and the track is re-sorted.
    pub fn stop_recording(&self) -> Result<()> {
        self.ensure_open()?;
        let mut st = self.shared.state.lock().unwrap();
        let was_running = self.shared.running.load(Ordering::Acquire);
        if self.shared.recording.swap(false, Ordering::AcqRel) {
            finish_recording(&mut st, was_running);
            self.shared.invalidate(&mut st);
        }
        Ok(())
    }

    /// Enable recording into `track` for `channel` (`None` is the
    /// all-channels wildcard). Record-enabled tracks are excluded from
    /// playback.
    pub fn set_record_enable(&self, track: usize, channel: Option<u8>) -> Result<()> {
        if let Some(channel) = channel {
            if channel > 0x0F {
                return Err(Error::InvalidData("channel out of range"));
            }
        }
        let mut st = self.shared.state.lock().unwrap();
        let track_count = st.sequence.as_ref().map(|seq| seq.tracks.len());
        match track_count {
            None => return Err(Error::InvalidData("no sequence loaded")),
            Some(count) if track >= count => {
                return Err(Error::InvalidData("no such track in the sequence"))
            }
            Some(_) => {}
        }
        st.record_enable.entry(track).or_default().insert(channel);
        self.shared.invalidate(&mut st);
        Ok(())
    }

    /// Disable recording into `track` entirely.
    pub fn record_disable(&self, track: usize) {
        let mut st = self.shared.state.lock().unwrap();
        if st.record_enable.remove(&track).is_some() {
            self.shared.invalidate(&mut st);
        }
    }

    /// Disable recording into every track.
    pub fn record_disable_all(&self) {
        let mut st = self.shared.state.lock().unwrap();
        if !st.record_enable.is_empty() {
            st.record_enable.clear();
            self.shared.invalidate(&mut st);
        }
    }

    /// Mute or unmute a track. Out-of-range tracks are ignored.
    pub fn set_track_mute(&self, track: usize, mute: bool) {
        let mut st = self.shared.state.lock().unwrap();
        if track < st.mute.len() && st.mute[track] != mute {
            st.mute[track] = mute;
            self.shared.invalidate(&mut st);
        }
    }

    /// Whether a track is muted. `false` for out-of-range tracks.
    pub fn track_mute(&self, track: usize) -> bool {
        let st = self.shared.state.lock().unwrap();
        st.mute.get(track).copied().unwrap_or(false)
    }

    /// Solo or unsolo a track. While any track is soloed, only soloed tracks
    /// play. Out-of-range tracks are ignored.
    pub fn set_track_solo(&self, track: usize, solo: bool) {
        let mut st = self.shared.state.lock().unwrap();
        if track < st.solo.len() && st.solo[track] != solo {
            st.solo[track] = solo;
            self.shared.invalidate(&mut st);
        }
    }

    /// Whether a track is soloed. `false` for out-of-range tracks.
    pub fn track_solo(&self, track: usize) -> bool {
        let st = self.shared.state.lock().unwrap();
        st.solo.get(track).copied().unwrap_or(false)
    }

    /// The tempo in microseconds per quarter note.
    pub fn tempo_in_mpq(&self) -> f32 {
        self.shared.state.lock().unwrap().tempo_mpq as f32
    }

    /// Set the tempo in microseconds per quarter note.
    pub fn set_tempo_in_mpq(&self, mpq: f32) -> Result<()> {
        if !(mpq > 0.0) {
            return Err(Error::InvalidData("tempo must be positive"));
        }
        self.shared.state.lock().unwrap().tempo_mpq = mpq as f64;
        Ok(())
    }

    /// The tempo in beats per minute.
    pub fn tempo_in_bpm(&self) -> f32 {
        (60_000_000.0 / self.shared.state.lock().unwrap().tempo_mpq) as f32
    }

    /// Set the tempo in beats per minute.
    pub fn set_tempo_in_bpm(&self, bpm: f32) -> Result<()> {
        if !(bpm > 0.0) {
            return Err(Error::InvalidData("tempo must be positive"));
        }
        self.shared.state.lock().unwrap().tempo_mpq = 60_000_000.0 / bpm as f64;
        Ok(())
    }

    /// The factor by which playback is sped up (above 1) or slowed down
    /// (below 1).
    pub fn tempo_factor(&self) -> f32 {
        self.shared.tempo_factor()
    }

    /// Scale the effective playback tempo. Has no effect on SMPTE-timed
    /// sequences' tick length, only on the scheduling of sleeps.
    pub fn set_tempo_factor(&self, factor: f32) -> Result<()> {
        if !(factor > 0.0) {
            return Err(Error::InvalidData("tempo factor must be positive"));
        }
        self.shared
            .tempo_factor_bits
            .store(factor.to_bits(), Ordering::Relaxed);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// How many times the loop region plays again after the first pass;
    /// [`LOOP_CONTINUOUSLY`] for endless looping.
    pub fn loop_count(&self) -> i32 {
        self.shared.state.lock().unwrap().loop_count
    }

    /// Set the loop count. `0` disables looping.
    pub fn set_loop_count(&self, count: i32) -> Result<()> {
        if count < LOOP_CONTINUOUSLY {
            return Err(Error::InvalidData("loop count must be -1 or above"));
        }
        self.shared.state.lock().unwrap().loop_count = count;
        Ok(())
    }

    /// The first tick of the loop region.
    pub fn loop_start_point(&self) -> i64 {
        self.shared.state.lock().unwrap().loop_start
    }

    /// Set the first tick of the loop region. Requires a sequence, and the
    /// tick must lie within it (and not past the loop end point).
    pub fn set_loop_start_point(&self, tick: i64) -> Result<()> {
        let mut st = self.shared.state.lock().unwrap();
        let length = st
            .sequence
            .as_ref()
            .map(Sequence::tick_length)
            .ok_or(Error::InvalidData("no sequence loaded"))?;
        if tick < 0 || tick > length {
            return Err(Error::InvalidData("loop start point outside the sequence"));
        }
        if st.loop_end != -1 && tick > st.loop_end {
            return Err(Error::InvalidData("loop start point past the loop end"));
        }
        st.loop_start = tick;
        Ok(())
    }

    /// The last tick of the loop region, or `-1` for "end of sequence".
    pub fn loop_end_point(&self) -> i64 {
        self.shared.state.lock().unwrap().loop_end
    }

    /// Set the last tick of the loop region; `-1` means "end of sequence".
    /// Requires a sequence, and the tick must lie within it, at or after the
    /// loop start point.
    pub fn set_loop_end_point(&self, tick: i64) -> Result<()> {
        let mut st = self.shared.state.lock().unwrap();
        let length = st
            .sequence
            .as_ref()
            .map(Sequence::tick_length)
            .ok_or(Error::InvalidData("no sequence loaded"))?;
        if tick != -1 {
            if tick < 0 || tick > length {
                return Err(Error::InvalidData("loop end point outside the sequence"));
            }
            if tick < st.loop_start {
                return Err(Error::InvalidData("loop end point before the loop start"));
            }
        }
        st.loop_end = tick;
        Ok(())
    }

    /// The current playback position in ticks.
    pub fn tick_position(&self) -> i64 {
        let st = self.shared.state.lock().unwrap();
        st.current_tick(self.is_running())
    }

    /// Jump to a position in ticks. During playback, the scheduler silently
    /// fast-forwards controllers, program changes and tempo state to the new
    /// position without sounding any notes.
    pub fn set_tick_position(&self, tick: i64) {
        let mut st = self.shared.state.lock().unwrap();
        st.anchor_position(tick);
        st.stopped_at = st.tick_set_at;
        self.shared.needs_refresh.store(true, Ordering::Release);
        self.shared.wake.notify_all();
    }

    /// The current playback position in microseconds.
    pub fn microsecond_position(&self) -> i64 {
        let st = self.shared.state.lock().unwrap();
        let tpus = st.ticks_per_micro();
        if tpus.is_nan() || tpus <= 0.0 {
            return 0;
        }
        (st.current_tick(self.is_running()) as f64 / tpus) as i64
    }

    /// The length of the loaded sequence in ticks, or 0.
    pub fn tick_length(&self) -> i64 {
        let st = self.shared.state.lock().unwrap();
        st.sequence.as_ref().map(Sequence::tick_length).unwrap_or(0)
    }

    /// The length of the loaded sequence in microseconds, or 0.
    pub fn microsecond_length(&self) -> i64 {
        let st = self.shared.state.lock().unwrap();
        st.sequence
            .as_ref()
            .map(Sequence::microsecond_length)
            .unwrap_or(0)
    }

    /// Attach a receiver; playback events are forwarded to every attached
    /// receiver with a timestamp of 0.
    pub fn add_receiver(&self, receiver: SharedReceiver) {
        let mut receivers = self.shared.receivers.lock().unwrap();
        if !receivers.iter().any(|r| Arc::ptr_eq(r, &receiver)) {
            receivers.push(receiver);
        }
    }

    /// Detach a previously attached receiver.
    pub fn remove_receiver(&self, receiver: &SharedReceiver) {
        self.shared
            .receivers
            .lock()
            .unwrap()
            .retain(|r| !Arc::ptr_eq(r, receiver));
    }

    /// Attach the sequencer to everything in its device registry: every
    /// registered receiver joins the playback fan-out, and the sequencer's
    /// recording receiver is connected to every registered transmitter.
    pub fn update_device_connections(&self) {
        for receiver in self.registry.receivers() {
            self.add_receiver(receiver);
        }
        for transmitter in self.registry.transmitters() {
            transmitter
                .lock()
                .unwrap()
                .set_receiver(Some(self.record_receiver.clone()));
        }
    }

    /// Register a listener fired for every meta event that plays (tempo
    /// changes included, even though they are not forwarded to receivers).
    ///
    /// The listener runs on the scheduler thread and must not register or
    /// remove listeners itself.
    pub fn add_meta_event_listener(
        &self,
        listener: impl FnMut(&MetaMessage) + Send + 'static,
    ) -> ListenerId {
        let mut listeners = self.shared.listeners.lock().unwrap();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.meta.push((id, Box::new(listener)));
        ListenerId(id)
    }

    /// Remove a meta event listener.
    pub fn remove_meta_event_listener(&self, id: ListenerId) {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .meta
            .retain(|(listener_id, _)| *listener_id != id.0);
    }

    /// Register a listener fired for control change events on the given
    /// controller numbers (an empty slice means every controller).
    ///
    /// The listener runs on the scheduler thread and must not register or
    /// remove listeners itself.
    pub fn add_controller_event_listener(
        &self,
        listener: impl FnMut(&ShortMessage) + Send + 'static,
        controllers: &[u8],
    ) -> ListenerId {
        let mut listeners = self.shared.listeners.lock().unwrap();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners
            .controller
            .push((id, controllers.to_vec(), Box::new(listener)));
        ListenerId(id)
    }

    /// Remove a controller event listener from the given controllers, or from
    /// all of them if `controllers` is empty. The listener is dropped once no
    /// controller registration remains.
    pub fn remove_controller_event_listener(&self, id: ListenerId, controllers: &[u8]) {
        let mut listeners = self.shared.listeners.lock().unwrap();
        if controllers.is_empty() {
            listeners
                .controller
                .retain(|(listener_id, _, _)| *listener_id != id.0);
            return;
        }
        for (listener_id, registered, _) in listeners.controller.iter_mut() {
            if *listener_id == id.0 {
                registered.retain(|controller| !controllers.contains(controller));
            }
        }
        listeners
            .controller
            .retain(|(listener_id, registered, _)| *listener_id != id.0 || !registered.is_empty());
    }
}

impl Default for Sequencer {
    fn default() -> Sequencer {
        Sequencer::new(DeviceRegistry::new())
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Merge the staged recording track into every record-enabled destination
/// track and drop the staging track.
fn finish_recording(st: &mut PlayState, running: bool) {
    let Some(rec_idx) = st.recording_track.take() else {
        return;
    };
    st.record_enable.remove(&rec_idx);
    let window_start = st.record_start_tick;
    let window_end = st.current_tick(running);
    let Some(seq) = st.sequence.as_mut() else {
        return;
    };
    if rec_idx >= seq.tracks.len() {
        return;
    }
    let recorded = seq.tracks.remove(rec_idx);
    for (track_idx, channels) in st.record_enable.iter() {
        if channels.is_empty() {
            continue;
        }
        let Some(track) = seq.tracks.get_mut(*track_idx) else {
            continue;
        };
        track.retain(|event| {
            !(event.tick >= window_start
                && event.tick <= window_end
                && recordable(&event.message, channels))
        });
        for event in recorded.iter() {
            if recordable(&event.message, channels) {
                track.add(event.clone());
            }
        }
        track.sort_events();
    }
}

/// The scheduler thread: park while idle, play a pass when started, repeat
/// until the sequencer closes.
fn worker_loop(shared: Arc<Shared>) {
    log::debug!("sequencer worker started");
    loop {
        {
            let mut st = shared.state.lock().unwrap();
            loop {
                if !shared.open.load(Ordering::Acquire) {
                    log::debug!("sequencer worker exiting");
                    return;
                }
                if shared.running.load(Ordering::Acquire) {
                    break;
                }
                st = shared.wake.wait(st).unwrap();
            }
        }
        if !play_pass(&shared) {
            log::debug!("sequencer worker exiting");
            return;
        }
    }
}

/// Play the merged track from the current position until it is exhausted
/// (including loop passes) or the sequencer closes.
///
/// Returns `false` when the sequencer closed, `true` when the worker should
/// go back to parking.
fn play_pass(shared: &Shared) -> bool {
    let mut index: usize = 0;
    // When set, events before this tick are fast-forwarded silently.
    let mut chase_until: Option<i64> = None;
    let mut positioned = false;
    let mut loops_done: u32 = 0;

    loop {
        let mut st = shared.state.lock().unwrap();
        if !shared.open.load(Ordering::Acquire) {
            return false;
        }

        if !shared.running.load(Ordering::Acquire) {
            // Paused; hold here until resumed or closed.
            loop {
                if !shared.open.load(Ordering::Acquire) {
                    return false;
                }
                if shared.running.load(Ordering::Acquire) {
                    break;
                }
                st = shared.wake.wait(st).unwrap();
            }
            st.tick_set_at = Instant::now();
            if chase_until.is_none() && !shared.needs_refresh.load(Ordering::Acquire) {
                if let Some(events) = &st.playing {
                    index = events.partition_point(|ev| ev.tick < st.tick_position);
                }
            }
        }

        if shared.needs_refresh.swap(false, Ordering::AcqRel) || st.playing.is_none() {
            if st.playing.is_none() {
                st.rebuild_playing();
                log::debug!(
                    "rebuilt playing track ({} events)",
                    st.playing.as_ref().map(Vec::len).unwrap_or(0)
                );
            }
            chase_until = Some(st.tick_position);
            index = 0;
            positioned = true;
        }
        let Some(events) = st.playing.as_ref() else {
            shared.running.store(false, Ordering::Release);
            st.stopped_at = Instant::now();
            return true;
        };
        if !positioned {
            positioned = true;
            index = events.partition_point(|ev| ev.tick < st.tick_position);
        }

        if index >= events.len() {
            // End of the merged track: loop again or finish.
            let play_again = if st.loop_count == LOOP_CONTINUOUSLY {
                true
            } else {
                loops_done += 1;
                loops_done < st.loop_count as u32 + 1
            };
            if play_again {
                let loop_start = st.loop_start;
                st.anchor_position(loop_start);
                index = 0;
                chase_until = None;
                continue;
            }
            shared.running.store(false, Ordering::Release);
            st.stopped_at = Instant::now();
            return true;
        }

        let event = events[index].clone();

        // Fast-forward silently up to the seek target: tempo state is
        // applied, controllers and other state-bearing messages are
        // re-emitted, notes are suppressed.
        if let Some(target) = chase_until {
            if event.tick < target {
                index += 1;
                if let Some(mpq) = event.message.tempo_micros() {
                    st.tempo_mpq = mpq as f64;
                } else if !is_note(&event.message) {
                    drop(st);
                    shared.dispatch(&event.message, 0);
                }
                continue;
            }
            chase_until = None;
        }

        // Events outside the loop region advance the position without
        // sounding.
        if event.tick < st.loop_start || (st.loop_end != -1 && event.tick > st.loop_end) {
            st.anchor_position(event.tick);
            index += 1;
            continue;
        }

        // Sleep out the gap to this event.
        let tpus = st.ticks_per_micro();
        let factor = shared.tempo_factor() as f64;
        let delta_ticks = (event.tick - st.tick_position) as f64;
        let sleep_micros = if tpus.is_nan() || tpus <= 0.0 || factor <= 0.0 {
            0.0
        } else {
            delta_ticks / tpus / factor
        };
        if sleep_micros >= 1.0 {
            let (guard, interrupted) =
                sleep_span(shared, st, Duration::from_secs_f64(sleep_micros / 1_000_000.0));
            st = guard;
            if interrupted {
                continue;
            }
        }
        st.anchor_position(event.tick);

        // A stop that raced the end of the sleep wins over the dispatch.
        if !shared.open.load(Ordering::Acquire) {
            return false;
        }
        if !shared.running.load(Ordering::Acquire) {
            continue;
        }

        index += 1;
        if let Some(mpq) = event.message.tempo_micros() {
            // Tempo changes are applied and announced, never forwarded.
            st.tempo_mpq = mpq as f64;
            drop(st);
            shared.fire_listeners(&event.message);
        } else {
            drop(st);
            shared.dispatch(&event.message, 0);
            shared.fire_listeners(&event.message);
        }
    }
}

/// `true` for note-on and note-off channel messages.
fn is_note(message: &MidiMessage) -> bool {
    match message {
        MidiMessage::Short(msg) if msg.status() < 0xF0 => matches!(
            msg.command(),
            ShortMessage::NOTE_ON | ShortMessage::NOTE_OFF
        ),
        _ => false,
    }
}

/// Sleep for `dur` while releasing the state lock, waking early when the
/// sequencer is stopped, closed or needs a refresh. The last millisecond is
/// spun for precision. Returns the reacquired guard and whether the sleep was
/// interrupted.
fn sleep_span<'a>(
    shared: &'a Shared,
    mut st: MutexGuard<'a, PlayState>,
    dur: Duration,
) -> (MutexGuard<'a, PlayState>, bool) {
    let deadline = Instant::now() + dur;
    loop {
        if !shared.open.load(Ordering::Acquire)
            || !shared.running.load(Ordering::Acquire)
            || shared.needs_refresh.load(Ordering::Acquire)
        {
            return (st, true);
        }
        let now = Instant::now();
        if now >= deadline {
            return (st, false);
        }
        let remaining = deadline - now;
        if remaining > SPIN_TAIL {
            let (guard, _) = shared.wake.wait_timeout(st, remaining - SPIN_TAIL).unwrap();
            st = guard;
        } else {
            drop(st);
            spin_sleep::sleep(remaining);
            st = shared.state.lock().unwrap();
        }
    }
}
