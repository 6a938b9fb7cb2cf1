//! Virtual radio for simulation.

use nowbus::config::PhyRate;
use nowbus::{Mac, Radio, RxQueue, TxStatusSignal};

/// A frame the bus handed to the radio, awaiting propagation.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub to: Mac,
    pub bytes: Vec<u8>,
}

/// Radio that records outgoing frames for the simulator to propagate.
///
/// Physical completion is not decided here: the simulator inspects link
/// state and scripted failures, then reports the outcome through
/// `handle_tx_status` exactly as a driver callback would.
pub struct SimRadio {
    mac: Mac,
    mtu: usize,
    sent: Vec<SentFrame>,
    pub channel: Option<u8>,
    pub link_peers: Vec<Mac>,
    rx: RxQueue,
    status: TxStatusSignal,
}

impl SimRadio {
    pub fn new(mac: Mac) -> Self {
        Self::with_mtu(mac, 1470)
    }

    pub fn with_mtu(mac: Mac, mtu: usize) -> Self {
        SimRadio {
            mac,
            mtu,
            sent: Vec::new(),
            channel: None,
            link_peers: Vec::new(),
            rx: RxQueue::new(),
            status: TxStatusSignal::new(),
        }
    }

    /// Drain the frames queued on the virtual air.
    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }
}

#[derive(Debug)]
pub struct SimRadioError;

impl Radio for SimRadio {
    type Error = SimRadioError;

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn self_mac(&self) -> Mac {
        self.mac
    }

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
        self.channel = Some(channel);
        Ok(())
    }

    fn set_rate(&mut self, _rate: PhyRate) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_group_key(&mut self, _pmk: &[u8; 16]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn add_link_peer(&mut self, mac: &Mac, _lmk: Option<&[u8; 16]>) -> Result<(), Self::Error> {
        if !self.link_peers.contains(mac) {
            self.link_peers.push(*mac);
        }
        Ok(())
    }

    fn remove_link_peer(&mut self, mac: &Mac) -> Result<(), Self::Error> {
        self.link_peers.retain(|m| m != mac);
        Ok(())
    }

    fn send(&mut self, mac: &Mac, frame: &[u8]) -> Result<(), Self::Error> {
        self.sent.push(SentFrame {
            to: *mac,
            bytes: frame.to_vec(),
        });
        Ok(())
    }

    fn incoming(&self) -> &RxQueue {
        &self.rx
    }

    fn tx_status(&self) -> &TxStatusSignal {
        &self.status
    }
}
