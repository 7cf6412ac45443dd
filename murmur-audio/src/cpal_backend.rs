//! Microphone capture and audio output using cpal.
//!
//! cpal streams are `!Send`, so each open stream is owned by a dedicated
//! thread; the rest of the crate talks to it over channels.

use crate::error::{CaptureError, PlaybackError};
use crate::traits::{AudioSink, CaptureBackend, CaptureHandle, CaptureStream};
use assistant::AudioClip;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

fn convert_samples<T, F>(data: &[T], convert_fn: F) -> Vec<f32>
where
    T: Copy,
    F: Fn(T) -> f32,
{
    data.iter().map(|&sample| convert_fn(sample)).collect()
}

fn build_input_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    sender: Sender<Vec<f32>>,
    convert_fn: F,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    F: Fn(T) -> f32 + Send + 'static,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = convert_samples(data, &convert_fn);
            if sender.send(chunk).is_err() {
                warn!("Capture stream: chunk channel closed, receiver dropped");
            }
        },
        |err| error!("Capture stream error: {}", err),
        None,
    )?;

    stream.play()?;
    info!("Capture stream started");
    Ok(stream)
}

struct CpalCaptureHandle {
    stop_tx: Sender<()>,
    #[allow(dead_code)]
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Capture from the default input device.
pub struct CpalCaptureBackend;

impl CpalCaptureBackend {
    pub fn new() -> Self {
        CpalCaptureBackend
    }
}

impl Default for CpalCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn open(&mut self) -> Result<CaptureStream, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no input device".to_string()))?;

        let supported_configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .collect();

        let supported_config = supported_configs
            .iter()
            .filter(|c| c.channels() <= 2)
            .find(|c| c.sample_format() == SampleFormat::F32)
            .or_else(|| supported_configs.iter().find(|c| c.channels() <= 2))
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable("no supported input config".to_string())
            })?;

        let desired = SampleRate(16000);
        let sample_rate = if supported_config.min_sample_rate() <= desired
            && desired <= supported_config.max_sample_rate()
        {
            desired
        } else {
            supported_config.min_sample_rate()
        };

        let config = StreamConfig {
            channels: std::cmp::min(1, supported_config.channels()),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = supported_config.sample_format();
        let device_name = device.name().unwrap_or_default();

        let (chunk_tx, chunk_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread = std::thread::spawn(move || {
            info!("Capture thread started");
            // Re-acquire the device in this thread; the Device itself is
            // not moved across threads.
            let host = cpal::default_host();
            let device = if device_name.is_empty() {
                host.default_input_device()
            } else {
                host.input_devices()
                    .ok()
                    .and_then(|mut devices| {
                        devices.find(|d| d.name().unwrap_or_default() == device_name)
                    })
                    .or_else(|| host.default_input_device())
            };
            let device = match device {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err("no input device".to_string()));
                    return;
                }
            };

            macro_rules! handle_format {
                ($sample_type:ty, $converter:expr) => {
                    build_input_stream::<$sample_type, _>(
                        &device,
                        &config,
                        chunk_tx.clone(),
                        $converter,
                    )
                };
            }

            let stream_result = match sample_format {
                SampleFormat::I8 => handle_format!(i8, |s| f32::from(s) / i8::MAX as f32),
                SampleFormat::I16 => handle_format!(i16, |s| f32::from(s) / i16::MAX as f32),
                SampleFormat::I32 => handle_format!(i32, |s| (s as f32) / i32::MAX as f32),
                SampleFormat::U8 => handle_format!(u8, |s| {
                    (f32::from(s) - (1u8 << 7) as f32) / ((1u8 << 7) - 1) as f32
                }),
                SampleFormat::U16 => handle_format!(u16, |s| {
                    (f32::from(s) - (1u16 << 15) as f32) / ((1u16 << 15) - 1) as f32
                }),
                SampleFormat::F32 => handle_format!(f32, |s| s),
                SampleFormat::F64 => handle_format!(f64, |s| s as f32),
                other => Err(anyhow::anyhow!("unsupported sample format: {:?}", other)),
            };

            let _stream = match stream_result {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            // The stream lives until the stop signal; dropping it here
            // releases the device.
            match stop_rx.recv() {
                Ok(_) => info!("Capture thread received stop signal"),
                Err(e) => warn!("Capture thread stop channel closed: {}", e),
            }
            info!("Capture thread exiting");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CaptureError::DeviceUnavailable(e)),
            Err(_) => {
                return Err(CaptureError::Backend("capture thread failed to start".to_string()));
            }
        }

        Ok(CaptureStream {
            chunks: chunk_rx,
            sample_rate: sample_rate.0,
            handle: Box::new(CpalCaptureHandle {
                stop_tx,
                thread: Some(thread),
            }),
        })
    }
}

enum SinkCommand {
    Pause,
    Resume,
    Stop,
}

struct SinkWorker {
    cmd_tx: Sender<SinkCommand>,
    finished: Arc<AtomicBool>,
    #[allow(dead_code)]
    thread: Option<JoinHandle<()>>,
}

/// Playback to the default output device.
///
/// Each started clip gets its own stream-owning thread; pause and resume
/// map onto `cpal::Stream::pause`/`play`.
pub struct CpalSink {
    worker: Option<SinkWorker>,
}

impl CpalSink {
    pub fn new() -> Self {
        CpalSink { worker: None }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self, clip: &AudioClip) -> Result<(), PlaybackError> {
        self.stop();

        let samples: Arc<Vec<f32>> = Arc::new(clip.samples.clone());
        let sample_rate = clip.sample_rate;
        let cursor = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(samples.is_empty()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let samples_cb = Arc::clone(&samples);
        let cursor_cb = Arc::clone(&cursor);
        let finished_cb = Arc::clone(&finished);

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err("no output device".to_string()));
                    return;
                }
            };

            let config = StreamConfig {
                channels: 1,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device.build_output_stream(
                &config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut index = cursor_cb.load(Ordering::Acquire);
                    for sample in output.iter_mut() {
                        if index < samples_cb.len() {
                            *sample = samples_cb[index];
                            index += 1;
                        } else {
                            *sample = 0.0;
                        }
                    }
                    cursor_cb.store(index, Ordering::Release);
                    if index >= samples_cb.len() {
                        finished_cb.store(true, Ordering::Release);
                    }
                },
                |err| error!("Playback stream error: {}", err),
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    SinkCommand::Pause => {
                        if let Err(e) = stream.pause() {
                            error!("Failed to pause output stream: {}", e);
                        }
                    }
                    SinkCommand::Resume => {
                        if let Err(e) = stream.play() {
                            error!("Failed to resume output stream: {}", e);
                        }
                    }
                    SinkCommand::Stop => break,
                }
            }
            // Dropping the stream releases the device.
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PlaybackError::Sink(e)),
            Err(_) => return Err(PlaybackError::Sink("playback thread failed".to_string())),
        }

        self.worker = Some(SinkWorker {
            cmd_tx,
            finished,
            thread: Some(thread),
        });
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        let worker = self.worker.as_ref().ok_or(PlaybackError::NotPlaying)?;
        worker
            .cmd_tx
            .send(SinkCommand::Pause)
            .map_err(|_| PlaybackError::Sink("playback thread gone".to_string()))
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        let worker = self.worker.as_ref().ok_or(PlaybackError::NotPaused)?;
        worker
            .cmd_tx
            .send(SinkCommand::Resume)
            .map_err(|_| PlaybackError::Sink("playback thread gone".to_string()))
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.cmd_tx.send(SinkCommand::Stop);
        }
    }

    fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| w.finished.load(Ordering::Acquire))
            .unwrap_or(true)
    }
}
