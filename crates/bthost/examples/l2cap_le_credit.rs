/// Example demonstrating L2CAP LE Credit-Based Flow Control over a loopback link
use bthost::dispatcher::{Dispatcher, ManualDispatcher};
use bthost::l2cap::packet::parse_basic_frame;
use bthost::l2cap::*;
use bthost::smp::SecurityProperties;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

const HANDLE: ConnectionHandle = 0x0040;

/// Hands every frame and credit grant to the channel on the other side
struct LoopbackLink {
    name: &'static str,
    dispatcher: Arc<ManualDispatcher>,
    peer: Mutex<Weak<Channel>>,
}

impl ChannelLink for LoopbackLink {
    fn send_frame(&self, _handle: ConnectionHandle, frame: Vec<u8>) {
        println!("[{}] -> {}", self.name, hex::encode(&frame));
        let peer = self.peer.lock().clone();
        self.dispatcher.post(Box::new(move || {
            if let (Some(peer), Some((_, payload))) = (peer.upgrade(), parse_basic_frame(&frame)) {
                peer.handle_rx_pdu(payload);
            }
        }));
    }

    fn signal_error(&self, handle: ConnectionHandle) {
        eprintln!("[{}] link error on {:#06x}", self.name, handle);
    }

    fn send_credits(&self, _handle: ConnectionHandle, local_cid: ChannelId, credits: u16) {
        println!("[{}] returning {} credit(s) for {:#06x}", self.name, credits, local_cid);
        let peer = self.peer.lock().clone();
        self.dispatcher.post(Box::new(move || {
            if let Some(peer) = peer.upgrade() {
                peer.add_credits(credits);
            }
        }));
    }

    fn security(&self, _handle: ConnectionHandle) -> SecurityProperties {
        SecurityProperties::none()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("L2CAP LE Credit-Based Flow Control Example");
    println!("------------------------------------------");

    let dispatcher = Arc::new(ManualDispatcher::new());
    // Small MPS and few credits so segmentation and credit return are visible
    let info = ChannelInfo::make_credit_based_flow_control_mode(
        CreditBasedFlowControlMode::LeCreditBasedFlowControl,
        256,
        256,
        10,
        3,
        Some(0x0080),
    );

    let central_link = Arc::new(LoopbackLink {
        name: "central",
        dispatcher: dispatcher.clone(),
        peer: Mutex::new(Weak::new()),
    });
    let peripheral_link = Arc::new(LoopbackLink {
        name: "peripheral",
        dispatcher: dispatcher.clone(),
        peer: Mutex::new(Weak::new()),
    });
    let central_weak: Weak<dyn ChannelLink> = Arc::<LoopbackLink>::downgrade(&central_link);
    let peripheral_weak: Weak<dyn ChannelLink> = Arc::<LoopbackLink>::downgrade(&peripheral_link);

    let central = Channel::new(
        0x0040,
        0x0041,
        HANDLE,
        LinkType::Le,
        info.clone(),
        central_weak,
        dispatcher.clone(),
    );
    let peripheral = Channel::new(
        0x0041,
        0x0040,
        HANDLE,
        LinkType::Le,
        info,
        peripheral_weak,
        dispatcher.clone(),
    );
    *central_link.peer.lock() = Arc::downgrade(&peripheral);
    *peripheral_link.peer.lock() = Arc::downgrade(&central);

    central.activate(Arc::new(|_| {}), Box::new(|| println!("central closed")));
    peripheral.activate(
        Arc::new(|sdu: Vec<u8>| match std::str::from_utf8(&sdu) {
            Ok(text) => println!("peripheral received: {}", text),
            Err(_) => println!("peripheral received: {:?}", sdu),
        }),
        Box::new(|| println!("peripheral closed")),
    );

    for message in ["Hello over LE credit-based flow control", "second message", "bye"] {
        if !central.send(message.as_bytes().to_vec()) {
            return Err(format!("failed to queue {:?}", message).into());
        }
    }

    let tasks = dispatcher.run_until_idle();
    println!("ran {} dispatcher task(s)", tasks);

    central.on_closed();
    peripheral.on_closed();
    Ok(())
}
