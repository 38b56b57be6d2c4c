use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::ProviderError;
use crate::gpio::{
    Direction, EdgeCallback, EdgeDetect, GpioLineProvider, InterruptProvider, IrqId, IrqReturn,
    LineHandle,
};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

/// Character-device backend: one line request per configured line and one
/// listener thread per registered interrupt.
pub struct LibgpiodBackend {
    chip: String,
    next_handle: AtomicU64,
    lines: RwLock<FxHashMap<LineHandle, LineSlot>>,
    irqs: Mutex<FxHashMap<IrqId, IrqSlot>>,
}

struct LineSlot {
    pin: u32,
    direction: Option<Direction>,
    gpiod_handle: Option<Arc<FairMutex<GpiodHandle>>>,
}

struct IrqSlot {
    pin: u32,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
    listener: Option<EdgeListener>,
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, ProviderError> {
        let chip = open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn request_lines(
        chip: &Chip,
        line_cfg: &line::Config,
    ) -> Result<request::Request, ProviderError> {
        let mut req_cfg = request::Config::new()
            .map_err(|e| ProviderError::Backend(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| ProviderError::Backend(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| ProviderError::Rejected(format!("request lines: {e}")))
    }
}

fn open_chip(path: &str) -> Result<Chip, ProviderError> {
    let p = PathBuf::from(path);
    Chip::open(&p).map_err(|e| ProviderError::Backend(format!("open chip {path}: {e}")))
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        pin: u32,
        edge: EdgeDetect,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        callback: EdgeCallback,
    ) -> Result<Self, ProviderError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| ProviderError::Backend(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let hdl = gpiod_handle.lock();
                let req = &hdl.request;

                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("wait edge events error for pin {pin}: {e}");
                            yield_now();
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let events = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for pin {pin}: {e}");
                        yield_now();
                        continue;
                    }
                };
                // handlers run one at a time on this thread
                for evt in events {
                    let observed = match evt.and_then(|e| e.event_type()) {
                        Ok(line::EdgeKind::Rising) => EdgeDetect::Rising,
                        Ok(line::EdgeKind::Falling) => EdgeDetect::Falling,
                        Err(_) => continue,
                    };
                    if observed == edge && callback() == IrqReturn::NotHandled {
                        debug!("edge on pin {pin} not handled");
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    pub fn new(chip: &str) -> Result<Self, ProviderError> {
        // fail early on a missing chip
        open_chip(chip)?;
        Ok(Self {
            chip: chip.to_string(),
            next_handle: AtomicU64::new(0),
            lines: RwLock::new(FxHashMap::default()),
            irqs: Mutex::new(FxHashMap::default()),
        })
    }

    fn make_line_settings(
        direction: Direction,
        debounce: Option<Duration>,
    ) -> Result<line::Settings, ProviderError> {
        let mut ls = line::Settings::new()
            .map_err(|e| ProviderError::Backend(format!("libgpiod settings: {e}")))?;

        match direction {
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| ProviderError::Rejected(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| ProviderError::Rejected(format!("set drive: {e}")))?;
                ls.set_output_value(line::Value::InActive)
                    .map_err(|e| ProviderError::Rejected(format!("set output value: {e}")))?;
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| ProviderError::Rejected(format!("set direction: {e}")))?;
                ls.set_edge_detection(Some(line::Edge::Rising))
                    .map_err(|e| ProviderError::Rejected(format!("set edge detection: {e}")))?;
                ls.set_event_clock(EventClock::Monotonic)
                    .map_err(|e| ProviderError::Rejected(format!("set event clock: {e}")))?;
                ls.set_debounce_period(debounce.unwrap_or_default());
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, ProviderError> {
        let mut cfg = line::Config::new()
            .map_err(|e| ProviderError::Backend(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| ProviderError::Backend(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn configured_handle(
        &self,
        handle: LineHandle,
    ) -> Result<(u32, Arc<FairMutex<GpiodHandle>>), ProviderError> {
        let lines = self.lines.read();
        let slot = lines
            .get(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        let gpiod_handle = slot.gpiod_handle.clone().ok_or_else(|| {
            ProviderError::Rejected(format!("pin {} is not configured", slot.pin))
        })?;
        Ok((slot.pin, gpiod_handle))
    }
}

impl GpioLineProvider for LibgpiodBackend {
    fn acquire(&self, pin: u32) -> Result<LineHandle, ProviderError> {
        let chip = open_chip(&self.chip)?;
        let num_lines = chip
            .info()
            .map_err(|e| ProviderError::Backend(format!("chip info: {e}")))?
            .num_lines();
        if pin as usize >= num_lines {
            return Err(ProviderError::InvalidPin(pin));
        }
        let in_use = chip
            .line_info(pin)
            .map_err(|e| ProviderError::Backend(format!("line info: {e}")))?
            .is_used();

        let mut lines = self.lines.write();
        if in_use || lines.values().any(|slot| slot.pin == pin) {
            return Err(ProviderError::Busy(pin));
        }

        let handle = LineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        lines.insert(
            handle,
            LineSlot {
                pin,
                direction: None,
                gpiod_handle: None,
            },
        );
        Ok(handle)
    }

    fn configure(
        &self,
        handle: LineHandle,
        direction: Direction,
        debounce: Option<Duration>,
    ) -> Result<(), ProviderError> {
        let mut lines = self.lines.write();
        let slot = lines
            .get_mut(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;

        let line_settings = Self::make_line_settings(direction, debounce)?;
        let line_cfg = Self::make_line_config(slot.pin, line_settings)?;

        if let Some(gpiod_handle) = slot.gpiod_handle.as_ref() {
            gpiod_handle
                .lock()
                .request
                .reconfigure_lines(&line_cfg)
                .map_err(|e| ProviderError::Rejected(format!("reconfigure lines: {e}")))?;
        } else {
            let gpiod_handle = GpiodHandle::new(&self.chip, &line_cfg)?;
            slot.gpiod_handle = Some(Arc::new(FairMutex::new(gpiod_handle)));
        }
        slot.direction = Some(direction);

        Ok(())
    }

    fn set_level(&self, handle: LineHandle, level: bool) -> Result<(), ProviderError> {
        let (pin, gpiod_handle) = self.configured_handle(handle)?;
        let value = if level {
            line::Value::Active
        } else {
            line::Value::InActive
        };

        gpiod_handle
            .lock()
            .request
            .set_value(pin, value)
            .map_err(|e| ProviderError::Backend(format!("set value: {e}")))?;
        Ok(())
    }

    fn read_level(&self, handle: LineHandle) -> Result<bool, ProviderError> {
        let (pin, gpiod_handle) = self.configured_handle(handle)?;

        let value = gpiod_handle
            .lock()
            .request
            .value(pin)
            .map_err(|e| ProviderError::Backend(format!("get value: {e}")))?;
        Ok(matches!(value, line::Value::Active))
    }

    fn release(&self, handle: LineHandle) -> Result<(), ProviderError> {
        // a listener still holding the request must stop first
        let irq = self.irqs.lock().remove(&IrqId(handle.0));
        drop(irq);
        match self.lines.write().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ProviderError::UnknownHandle(handle.0)),
        }
    }
}

impl InterruptProvider for LibgpiodBackend {
    fn map_to_interrupt(&self, handle: LineHandle) -> Result<IrqId, ProviderError> {
        let lines = self.lines.read();
        let slot = lines
            .get(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        let gpiod_handle = match (&slot.direction, &slot.gpiod_handle) {
            (Some(Direction::Input), Some(gpiod_handle)) => gpiod_handle.clone(),
            _ => {
                return Err(ProviderError::Rejected(format!(
                    "pin {} is not a configured input",
                    slot.pin
                )));
            }
        };

        let irq = IrqId(handle.0);
        self.irqs.lock().entry(irq).or_insert_with(|| IrqSlot {
            pin: slot.pin,
            gpiod_handle,
            listener: None,
        });
        Ok(irq)
    }

    fn register(
        &self,
        irq: IrqId,
        edge: EdgeDetect,
        callback: EdgeCallback,
    ) -> Result<(), ProviderError> {
        let mut irqs = self.irqs.lock();
        let slot = irqs.get_mut(&irq).ok_or(ProviderError::UnknownIrq(irq.0))?;
        if slot.listener.is_some() {
            return Err(ProviderError::Rejected(format!(
                "pin {} already has a handler",
                slot.pin
            )));
        }

        slot.listener = Some(EdgeListener::new(
            slot.pin,
            edge,
            slot.gpiod_handle.clone(),
            callback,
        )?);
        Ok(())
    }

    fn unregister(&self, irq: IrqId) -> Result<(), ProviderError> {
        let slot = self.irqs.lock().remove(&irq);
        // joining the listener waits out a running handler
        drop(slot);
        Ok(())
    }
}
