//! Device stream management and the bounded utterance queue.
//!
//! A [`CaptureBuffer`] owns the cpal input stream and the silence gate. The
//! stream callback feeds [`Shared::ingest`], which normalizes each chunk and
//! either queues it or drops it; drained audio comes back out through a
//! clone-able [`UtteranceDrain`] that worker jobs can carry across threads
//! (the stream itself never leaves the control thread).

use super::gate::VadGate;
use super::{resample_to_target_rate, TARGET_RATE};
use crate::config::AppConfig;
#[cfg(not(test))]
use crate::log_debug;
use crate::protocol::DeviceDescriptor;
use anyhow::Result;
#[cfg(not(test))]
use anyhow::{anyhow, Context};
#[cfg(not(test))]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(not(test))]
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// State shared with the cpal callback thread.
struct Shared {
    active: AtomicBool,
    gate: Mutex<VadGate>,
    tx: Sender<Vec<f32>>,
}

impl Shared {
    /// Callback-side path: downmix, resample, gate, try_send. Never blocks.
    fn ingest<T, F>(&self, data: &[T], channels: usize, device_rate: u32, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        let mut mono = Vec::with_capacity(data.len() / channels.max(1) + 1);
        downmix_into(&mut mono, data, channels, convert);
        let chunk = resample_to_target_rate(&mono, device_rate);
        if chunk.is_empty() {
            return;
        }
        // Contention on the gate means the control thread is resetting it;
        // dropping this chunk is cheaper than stalling the device callback.
        let admitted = match self.gate.try_lock() {
            Ok(mut gate) => gate.admit(&chunk),
            Err(_) => return,
        };
        if !admitted {
            return;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Queue at capacity: the newest chunk is the one that goes.
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Downmix interleaved multi-channel samples to mono while converting to f32.
fn downmix_into<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Receiving end of the utterance queue. Clones share the same queue, so a
/// worker job can drain audio the callback queued without touching the stream.
#[derive(Clone)]
pub struct UtteranceDrain {
    rx: Receiver<Vec<f32>>,
}

impl UtteranceDrain {
    /// Concatenate everything currently queued. A second call right after
    /// returns empty.
    pub fn drain(&self) -> Vec<f32> {
        let mut samples = Vec::new();
        while let Ok(chunk) = self.rx.try_recv() {
            samples.extend_from_slice(&chunk);
        }
        samples
    }

    /// Discard any queued residue without collecting it.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Owns the input stream and the capture state machine's audio side.
pub struct CaptureBuffer {
    shared: Arc<Shared>,
    drain: UtteranceDrain,
    device_index: Option<usize>,
    #[cfg(not(test))]
    stream: Option<cpal::Stream>,
    #[cfg(test)]
    stream_open: bool,
    #[cfg(test)]
    pub(crate) fail_open: bool,
}

impl CaptureBuffer {
    pub fn new(config: &AppConfig) -> Self {
        let (tx, rx) = bounded::<Vec<f32>>(config.queue_capacity);
        let trailing_budget = (TARGET_RATE / 2) as usize;
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                gate: Mutex::new(VadGate::new(config.silence_threshold, trailing_budget)),
                tx,
            }),
            drain: UtteranceDrain { rx },
            device_index: config.input_device,
            #[cfg(not(test))]
            stream: None,
            #[cfg(test)]
            stream_open: false,
            #[cfg(test)]
            fail_open: false,
        }
    }

    /// Open (or reopen) the input stream, preferring `index` when given.
    /// Any previous stream is torn down first and stale audio is discarded.
    #[cfg(not(test))]
    pub fn open_stream(&mut self, index: Option<usize>) -> Result<()> {
        self.stream = None;
        self.drain.clear();

        let host = cpal::default_host();
        let device = match index {
            Some(wanted) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .nth(wanted)
                    .ok_or_else(|| anyhow!("input device index {wanted} not found"))?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no default input device available"))?,
        };

        let default_config = device.default_input_config()?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        log_debug(&format!(
            "opening input stream: format={format:?} rate={device_rate}Hz channels={channels}"
        ));

        let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
        let stream = match format {
            SampleFormat::F32 => {
                let shared = self.shared.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| shared.ingest(data, channels, device_rate, |s| s),
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let shared = self.shared.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        shared.ingest(data, channels, device_rate, |s| s as f32 / 32_768.0_f32)
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let shared = self.shared.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        shared.ingest(data, channels, device_rate, |s| {
                            (s as f32 - 32_768.0_f32) / 32_768.0_f32
                        })
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };
        stream.play()?;

        self.stream = Some(stream);
        self.device_index = index.or(self.device_index);
        Ok(())
    }

    #[cfg(test)]
    pub fn open_stream(&mut self, index: Option<usize>) -> Result<()> {
        use anyhow::anyhow;
        if self.fail_open {
            return Err(anyhow!("simulated stream open failure"));
        }
        self.drain.clear();
        self.stream_open = true;
        self.device_index = index.or(self.device_index);
        Ok(())
    }

    fn stream_running(&self) -> bool {
        #[cfg(not(test))]
        {
            self.stream.is_some()
        }
        #[cfg(test)]
        {
            self.stream_open
        }
    }

    /// Switch to another input device. No-op when the requested device is
    /// already the open one.
    pub fn set_device(&mut self, index: usize) -> Result<()> {
        if self.device_index == Some(index) && self.stream_running() {
            return Ok(());
        }
        self.open_stream(Some(index))
    }

    /// Arm the gate and start admitting audio. Idempotent while capturing.
    pub fn begin_capture(&mut self) -> Result<()> {
        if self.shared.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        if !self.stream_running() {
            self.open_stream(self.device_index)?;
        }
        self.drain.clear();
        self.shared
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.shared.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop admitting audio. Already-queued chunks stay for the drain.
    pub fn end_capture(&mut self) {
        self.shared.active.store(false, Ordering::Relaxed);
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn device_index(&self) -> Option<usize> {
        self.device_index
    }

    pub fn drain_handle(&self) -> UtteranceDrain {
        self.drain.clone()
    }

    /// Enumerate input devices. Enumeration failures yield an empty list; the
    /// frontend treats that the same as a machine with no microphone.
    #[cfg(not(test))]
    pub fn list_devices() -> Vec<DeviceDescriptor> {
        let host = cpal::default_host();
        let host_api = host.id().name().to_string();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(err) => {
                log_debug(&format!("device enumeration failed: {err}"));
                return Vec::new();
            }
        };
        devices
            .enumerate()
            .filter_map(|(index, device)| {
                device.name().ok().map(|name| DeviceDescriptor {
                    index,
                    name,
                    host_api: host_api.clone(),
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub fn list_devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor {
                index: 0,
                name: "Stub Mic".to_string(),
                host_api: "stub".to_string(),
            },
            DeviceDescriptor {
                index: 1,
                name: "Stub Headset".to_string(),
                host_api: "stub".to_string(),
            },
        ]
    }

    /// Simulate one device callback delivering interleaved samples.
    #[cfg(test)]
    pub(crate) fn push_chunk(&self, data: &[f32], channels: usize, device_rate: u32) {
        self.shared.ingest(data, channels, device_rate, |s| s);
    }
}
