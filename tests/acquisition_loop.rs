//! End-to-end mock acquisition: one SignalDriver and one DataDriver on
//! their own threads, kept in lock-step only through the device channel.
//!
//! The mock device acknowledges each trigger and emits one frame per
//! trigger. The signal side pends on each acknowledgment; the data side
//! blocks on frame arrival inside its step body.

use acq_core::channel::{self, Endpoint, MessageChannel};
use acq_core::routine::{DriverStatus, StepSpec, TreeBuilder};
use std::thread;
use std::time::Duration;

const FRAMES: u32 = 5;

#[derive(Debug)]
enum ToDevice {
    Trigger { seq: u32 },
}

#[derive(Debug)]
enum FromDevice {
    Ack { seq: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    seq: u32,
}

struct SignalCtx {
    device: Endpoint<ToDevice>,
    seq: u32,
    acked: u32,
}

struct DataCtx {
    frames: Endpoint<Frame>,
    collected: Vec<u32>,
}

#[test]
fn test_mock_acquisition_collects_every_frame() {
    let (sig_end, dev_sig_end) = channel::pair::<ToDevice>();
    let (ack_tx, ack_rx) = channel::pair::<FromDevice>();
    let (frame_host, frame_dev) = channel::pair::<Frame>();

    // Mock device: ack each trigger, then emit the matching frame.
    let device = thread::Builder::new()
        .name("mock-device".into())
        .spawn(move || {
            for _ in 0..FRAMES {
                let ToDevice::Trigger { seq } = dev_sig_end.receive().unwrap();
                ack_tx.send(FromDevice::Ack { seq }).unwrap();
                frame_dev.send(Frame { seq }).unwrap();
            }
        })
        .unwrap();

    // Signal side: trigger, pend on the acknowledgment, repeat.
    let signal_thread = thread::Builder::new()
        .name("signal-driver".into())
        .spawn(move || {
            let spec = vec![vec![StepSpec::new("trigger_camera")
                .signal_main(|cx: &mut SignalCtx| {
                    cx.seq += 1;
                    cx.device.send(ToDevice::Trigger { seq: cx.seq })?;
                    Ok(true)
                })
                .signal_response(|cx: &mut SignalCtx| {
                    cx.acked += 1;
                    Ok(true)
                })]];
            let (mut signal, _unused_data) = TreeBuilder::new().repeats(FRAMES).build(spec);

            let mut cx = SignalCtx {
                device: sig_end,
                seq: 0,
                acked: 0,
            };
            loop {
                match signal.run(&mut cx, false).unwrap() {
                    DriverStatus::Pending => {
                        let FromDevice::Ack { seq } = ack_rx
                            .receive_timeout(Duration::from_secs(2))
                            .unwrap()
                            .expect("device never acknowledged");
                        assert_eq!(seq, cx.seq);
                        match signal.run(&mut cx, true).unwrap() {
                            DriverStatus::Finished => break,
                            DriverStatus::PassComplete | DriverStatus::Pending => {}
                        }
                    }
                    DriverStatus::PassComplete => {}
                    DriverStatus::Finished => break,
                }
            }
            cx
        })
        .unwrap();

    // Data side: one pass per frame, blocking on arrival inside the body.
    let data_thread = thread::Builder::new()
        .name("data-driver".into())
        .spawn(move || {
            let spec = vec![vec![StepSpec::new("collect_frame").data_main(
                |cx: &mut DataCtx| {
                    let frame = cx
                        .frames
                        .receive_timeout(Duration::from_secs(2))?
                        .ok_or_else(|| anyhow::anyhow!("frame never arrived"))?;
                    cx.collected.push(frame.seq);
                    Ok(true)
                },
            )]];
            let (_unused_signal, mut data) = TreeBuilder::new().build(spec);

            let mut cx = DataCtx {
                frames: frame_host,
                collected: Vec::new(),
            };
            while cx.collected.len() < FRAMES as usize {
                assert_eq!(data.run(&mut cx).unwrap(), DriverStatus::PassComplete);
            }
            cx
        })
        .unwrap();

    device.join().unwrap();
    let signal_cx = signal_thread.join().unwrap();
    let data_cx = data_thread.join().unwrap();

    assert_eq!(signal_cx.seq, FRAMES);
    assert_eq!(signal_cx.acked, FRAMES);
    assert_eq!(data_cx.collected, (1..=FRAMES).collect::<Vec<u32>>());
}
