//! Host side of the USB-FPGA bridge.
//!
//! Wire-ins are latched on the host and only reach the FPGA on
//! [`Transport::update_wire_ins`]; wire-outs are sampled from the FPGA on
//! [`Transport::update_wire_outs`] and then read from the host copy.

use rhd_types::TransportError;

pub trait Transport: Send {
    /// True once a device has been opened and configured.
    fn is_open(&self) -> bool;

    /// Latches `value` into the bits of wire-in `addr` selected by `mask`.
    fn set_wire_in(&mut self, addr: u8, value: u32, mask: u32);

    fn update_wire_ins(&mut self) -> Result<(), TransportError>;

    fn update_wire_outs(&mut self) -> Result<(), TransportError>;

    /// Value of wire-out `addr` as of the last update.
    fn wire_out(&self, addr: u8) -> u32;

    fn activate_trigger(&mut self, addr: u8, bit: u32) -> Result<(), TransportError>;

    /// Blocking bulk read from pipe-out `addr`. Returns the bytes read.
    fn read_pipe(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn set_wire_in(&mut self, addr: u8, value: u32, mask: u32) {
        (**self).set_wire_in(addr, value, mask)
    }

    fn update_wire_ins(&mut self) -> Result<(), TransportError> {
        (**self).update_wire_ins()
    }

    fn update_wire_outs(&mut self) -> Result<(), TransportError> {
        (**self).update_wire_outs()
    }

    fn wire_out(&self, addr: u8) -> u32 {
        (**self).wire_out(addr)
    }

    fn activate_trigger(&mut self, addr: u8, bit: u32) -> Result<(), TransportError> {
        (**self).activate_trigger(addr, bit)
    }

    fn read_pipe(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_pipe(addr, buf)
    }
}
