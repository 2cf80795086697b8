use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::observation::{
    EconomyRecord, FrameIndex, FrameObservation, Position, RawEntityRecord, RawVitals,
    ResearchId, SideId, SideMessage, Tag, UnitTypeId,
};
use crate::pipeline::{CancelToken, ExtractionOutput};
use crate::sink::{OutputSink, SinkError, SinkReceipt};
use crate::source::{JobRef, ObservationSource, SessionFactory, SimulationSession, SourceError};

pub(crate) fn unit(tag: u64, type_id: u32) -> RawEntityRecord {
    RawEntityRecord {
        tag: Some(Tag(tag)),
        type_id: Some(UnitTypeId(type_id)),
        is_structure: false,
        position: Some(Position {
            x: tag as f64,
            y: 10.0,
            z: 0.0,
        }),
        vitals: RawVitals {
            health: Some(45.0),
            health_max: Some(45.0),
            energy: Some(50.0),
            energy_max: Some(200.0),
            ..RawVitals::default()
        },
        build_progress: None,
    }
}

pub(crate) fn structure(tag: u64, type_id: u32, progress: f64) -> RawEntityRecord {
    RawEntityRecord {
        tag: Some(Tag(tag)),
        type_id: Some(UnitTypeId(type_id)),
        is_structure: true,
        position: Some(Position {
            x: 30.0,
            y: tag as f64,
            z: 0.0,
        }),
        vitals: RawVitals {
            health: Some(400.0 * progress),
            health_max: Some(400.0),
            ..RawVitals::default()
        },
        build_progress: Some(progress),
    }
}

pub(crate) struct FrameBuilder {
    frame: FrameObservation,
}

impl FrameBuilder {
    pub fn new(frame_index: FrameIndex) -> Self {
        Self {
            frame: FrameObservation::new(frame_index),
        }
    }

    pub fn side(mut self, side: SideId) -> Self {
        self.frame.sides.entry(side).or_default();
        self
    }

    pub fn entity(mut self, side: SideId, record: RawEntityRecord) -> Self {
        self.frame.sides.entry(side).or_default().entities.push(record);
        self
    }

    pub fn economy(mut self, side: SideId, economy: EconomyRecord) -> Self {
        self.frame.sides.entry(side).or_default().economy = economy;
        self
    }

    pub fn research(mut self, side: SideId, research: u32) -> Self {
        self.frame
            .sides
            .entry(side)
            .or_default()
            .completed_research
            .insert(ResearchId(research));
        self
    }

    pub fn dead(mut self, tag: u64) -> Self {
        self.frame.dead_tags.push(Tag(tag));
        self
    }

    pub fn message(mut self, side: SideId, text: &str) -> Self {
        self.frame.messages.push(SideMessage {
            side,
            text: text.to_string(),
        });
        self
    }

    pub fn build(self) -> FrameObservation {
        self.frame
    }
}

pub(crate) struct VecSource {
    frames: VecDeque<FrameObservation>,
    terminate_after: Option<usize>,
    delivered: usize,
    cancel_on_advance: Option<CancelToken>,
}

impl VecSource {
    pub fn new(frames: Vec<FrameObservation>) -> Self {
        Self {
            frames: frames.into(),
            terminate_after: None,
            delivered: 0,
            cancel_on_advance: None,
        }
    }
}

impl ObservationSource for VecSource {
    fn advance(&mut self) -> Result<Option<FrameObservation>, SourceError> {
        if let Some(token) = &self.cancel_on_advance {
            token.cancel();
        }
        if self.terminate_after == Some(self.delivered) {
            return Err(SourceError::Terminated {
                reason: format!("scripted termination after {} frame(s)", self.delivered),
            });
        }
        self.delivered += 1;
        Ok(self.frames.pop_front())
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    frames: Vec<FrameObservation>,
    fail_open: bool,
    panic_on_open: bool,
    extra_frame_on_second_pass: bool,
    terminate_after: Option<usize>,
    cancel_on_advance: Option<CancelToken>,
}

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicUsize,
    opens: AtomicUsize,
    resets: AtomicUsize,
}

/// In-memory session factory keyed by `JobRef::source`, with scripted
/// failure modes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedFactory {
    scripts: HashMap<PathBuf, Script>,
    fail_start: bool,
    counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self, job: &JobRef) -> &mut Script {
        self.scripts.entry(job.source.clone()).or_default()
    }

    pub fn with_frames(mut self, job: &JobRef, frames: Vec<FrameObservation>) -> Self {
        self.script(job).frames = frames;
        self
    }

    pub fn with_open_failure(mut self, job: &JobRef) -> Self {
        self.script(job).fail_open = true;
        self
    }

    pub fn with_panic(mut self, job: &JobRef) -> Self {
        self.script(job).panic_on_open = true;
        self
    }

    pub fn with_second_pass_extra_frame(mut self, job: &JobRef) -> Self {
        self.script(job).extra_frame_on_second_pass = true;
        self
    }

    pub fn with_termination_after(mut self, job: &JobRef, frames: usize) -> Self {
        self.script(job).terminate_after = Some(frames);
        self
    }

    pub fn with_cancel_on_advance(mut self, job: &JobRef, token: CancelToken) -> Self {
        self.script(job).cancel_on_advance = Some(token);
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.counters.resets.load(Ordering::SeqCst)
    }
}

impl SessionFactory for ScriptedFactory {
    type Session = ScriptedSession;

    fn start(&self, worker_index: usize) -> Result<Self::Session, SourceError> {
        if self.fail_start {
            return Err(SourceError::Session {
                reason: format!("scripted start failure on worker {worker_index}"),
            });
        }
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            scripts: self.scripts.clone(),
            counters: Arc::clone(&self.counters),
            opened: HashMap::new(),
        })
    }
}

pub(crate) struct ScriptedSession {
    scripts: HashMap<PathBuf, Script>,
    counters: Arc<Counters>,
    opened: HashMap<PathBuf, usize>,
}

impl SimulationSession for ScriptedSession {
    fn open<'a>(
        &'a mut self,
        job: &JobRef,
    ) -> Result<Box<dyn ObservationSource + 'a>, SourceError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.scripts.get(&job.source) else {
            return Err(SourceError::Open {
                job: job.to_string(),
                reason: "no scripted frames".to_string(),
            });
        };
        if script.fail_open {
            return Err(SourceError::Open {
                job: job.to_string(),
                reason: "scripted open failure".to_string(),
            });
        }
        if script.panic_on_open {
            panic!("scripted panic while opening {job}");
        }
        let opened = self.opened.entry(job.source.clone()).or_default();
        *opened += 1;

        let mut frames = script.frames.clone();
        if script.extra_frame_on_second_pass && *opened % 2 == 0 {
            let next = frames.last().map_or(0, |frame| frame.frame_index + 1);
            frames.push(FrameObservation::new(next));
        }
        let mut source = VecSource::new(frames);
        source.terminate_after = script.terminate_after;
        source.cancel_on_advance = script.cancel_on_advance.clone();
        Ok(Box::new(source))
    }

    fn reset(&mut self) -> Result<(), SourceError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps outputs in memory and can fail its first writes.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    written: Mutex<Vec<(JobRef, usize)>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<(JobRef, usize)> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl OutputSink for MemorySink {
    fn write(&self, job: &JobRef, output: &ExtractionOutput) -> Result<SinkReceipt, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Rejected {
                job: job.to_string(),
                reason: "scripted sink failure".to_string(),
            });
        }
        if let Ok(mut written) = self.written.lock() {
            written.push((job.clone(), output.rows.len()));
        }
        Ok(SinkReceipt::default())
    }
}
