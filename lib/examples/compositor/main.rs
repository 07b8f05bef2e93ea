//! Runs an application thread and a compositor loop against a single buffer
//! queue, the way a display service would for one layer.
//!
//! The application thread dequeues buffers, "renders" into them and queues
//! them. When no buffer is free, it sets an `Event` as the queue's buffer wait
//! event and sleeps on it until the compositor releases a buffer. The
//! compositor acquires and releases one buffer per interval.
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use clap::{value_parser, Arg, Command};
use log::{debug, info};
use nvflinger::{BufferQueue, Event, IgbpBuffer, QueryType, TransformFlags, WaitNotifier};

type SharedQueue = Arc<Mutex<BufferQueue<Arc<Event>>>>;

fn parse_frame_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = s
        .split_once('x')
        .context("frame size must be formatted as WIDTHxHEIGHT")?;
    let width: u32 = width.parse().context("invalid frame width")?;
    let height: u32 = height.parse().context("invalid frame height")?;
    ensure!(width > 0 && height > 0, "frame size cannot be empty");

    Ok((width, height))
}

const BYTES_PER_PIXEL: u32 = 4;

/// Offset of the buffer of `slot` in the layer's memory, with all buffers laid
/// out one after the other.
fn buffer_offset(slot: u32, (width, height): (u32, u32)) -> anyhow::Result<u32> {
    width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .and_then(|size| size.checked_mul(slot))
        .with_context(|| {
            format!(
                "{} buffers of {}x{} do not fit in a 32-bit address space",
                slot + 1,
                width,
                height
            )
        })
}

/// Application side: render frames as fast as buffers are available.
fn run_producer(
    queue: SharedQueue,
    event: Arc<Event>,
    lets_quit: Arc<AtomicBool>,
    (width, height): (u32, u32),
) -> anyhow::Result<usize> {
    let mut frame_counter = 0usize;
    let mut num_waits = 0usize;

    while !lets_quit.load(Ordering::SeqCst) {
        let dequeued = {
            let mut queue = queue.lock().unwrap();
            let slot = queue.dequeue_buffer(width, height);
            if slot.is_none() && !queue.has_buffer_wait_event() {
                queue.set_buffer_wait_event(Arc::clone(&event));
            }
            slot
        };

        let slot = match dequeued {
            Some(slot) => slot,
            None => {
                num_waits += 1;
                event.wait().context("failed to wait for a free buffer")?;
                continue;
            }
        };

        let buffer = *queue.lock().unwrap().request_buffer(slot);
        debug!(
            "Rendering frame {} into slot {} (nvmap {} at {:#x})",
            frame_counter, slot, buffer.nvmap_id, buffer.offset
        );

        // Alternate orientations so the compositor has something to apply.
        let transform = if frame_counter % 2 == 0 {
            TransformFlags::empty()
        } else {
            TransformFlags::FLIP_V
        };
        queue.lock().unwrap().queue_buffer(slot, transform);
        frame_counter += 1;
    }

    info!(
        "Producer rendered {} frames, waited {} times for a buffer",
        frame_counter, num_waits
    );

    Ok(frame_counter)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = Command::new("Buffer queue compositor")
        .arg(
            Arg::new("num_frames")
                .long("frames")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .help("Stop after presenting a given number of frames"),
        )
        .arg(
            Arg::new("frame_size")
                .long("frame_size")
                .takes_value(true)
                .value_parser(value_parser!(String))
                .default_value("1280x720")
                .help("Size of the buffers of the layer (e.g. \"1280x720\")"),
        )
        .arg(
            Arg::new("num_slots")
                .long("slots")
                .takes_value(true)
                .value_parser(value_parser!(u32))
                .default_value("2")
                .help("Number of buffers registered in the queue"),
        )
        .arg(
            Arg::new("interval_ms")
                .long("interval_ms")
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .default_value("16")
                .help("Time between two compositions, in milliseconds"),
        )
        .get_matches();

    let stop_after = matches.get_one::<usize>("num_frames").copied();
    let frame_size = matches
        .get_one::<String>("frame_size")
        .map(|s| parse_frame_size(s))
        .unwrap()
        .expect("Invalid parameter for frame_size");
    let num_slots = *matches.get_one::<u32>("num_slots").unwrap();
    let interval = Duration::from_millis(*matches.get_one::<u64>("interval_ms").unwrap());

    let lets_quit = Arc::new(AtomicBool::new(false));
    // Setup the Ctrl+c handler.
    {
        let lets_quit_handler = lets_quit.clone();
        ctrlc::set_handler(move || {
            lets_quit_handler.store(true, Ordering::SeqCst);
        })
        .expect("Failed to set Ctrl-C handler.");
    }

    let mut queue = BufferQueue::<Arc<Event>>::new(0, 1).context("failed to create queue")?;
    let format = queue.query(QueryType::NativeWindowFormat);
    let (width, height) = frame_size;
    for slot in 0..num_slots {
        queue.set_preallocated_buffer(
            slot,
            IgbpBuffer {
                width,
                height,
                stride: width,
                format,
                nvmap_id: slot + 1,
                offset: buffer_offset(slot, frame_size)?,
                ..Default::default()
            },
        );
    }
    println!(
        "Registered {} buffers of {}x{} (format {})",
        num_slots, width, height, format
    );

    let queue: SharedQueue = Arc::new(Mutex::new(queue));
    let event = Arc::new(Event::new().context("failed to create buffer wait event")?);

    let producer = {
        let queue = Arc::clone(&queue);
        let event = Arc::clone(&event);
        let lets_quit = Arc::clone(&lets_quit);
        thread::spawn(move || run_producer(queue, event, lets_quit, frame_size))
    };

    let start_time = Instant::now();
    let mut frame_counter = 0usize;
    let mut missed = 0usize;
    while !lets_quit.load(Ordering::SeqCst) {
        if stop_after == Some(frame_counter) {
            break;
        }

        thread::sleep(interval);

        let mut queue = queue.lock().unwrap();
        let (slot, transform) = match queue.acquire_buffer() {
            Some(acquired) => (acquired.slot_id(), acquired.transform()),
            None => {
                missed += 1;
                continue;
            }
        };
        debug!("Presenting slot {} with transform {:?}", slot, transform);
        queue.release_buffer(slot);
        drop(queue);

        frame_counter += 1;
        let fps = frame_counter as f32 / start_time.elapsed().as_millis() as f32 * 1000.0;
        print!(
            "\rPresented frame {:#5}, slot: {:#2}, missed compositions: {:#4} fps: {:#5.2}",
            frame_counter, slot, missed, fps,
        );
        io::stdout().flush().unwrap();
    }

    // Insert new line since we were overwriting the same one
    println!();

    lets_quit.store(true, Ordering::SeqCst);
    // Wake the producer up in case it is waiting for a buffer.
    event.signal();
    let rendered = producer
        .join()
        .expect("Producer thread panicked")
        .expect("Producer failed");

    // Every frame presented must have been rendered first.
    assert!(rendered >= frame_counter);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{buffer_offset, parse_frame_size};

    #[test]
    fn frame_size() {
        assert_eq!(parse_frame_size("640x480").unwrap(), (640, 480));
        assert!(parse_frame_size("640").is_err());
        assert!(parse_frame_size("640xabc").is_err());
        assert!(parse_frame_size("0x480").is_err());
    }

    #[test]
    fn offsets() {
        assert_eq!(buffer_offset(0, (1280, 720)).unwrap(), 0);
        assert_eq!(buffer_offset(2, (1280, 720)).unwrap(), 2 * 1280 * 720 * 4);
        // The first buffer always fits, whatever its size.
        assert_eq!(buffer_offset(0, (4096, 4096)).unwrap(), 0);
        assert!(buffer_offset(64, (4096, 4096)).is_err());
        assert!(buffer_offset(1, (u32::MAX, 2)).is_err());
    }
}
