//! Raspberry Pi adapters: MCP3304 over SPI and GPIO actuator lines.

use ecu_traits::{Actuator, AnalogInput, Level};
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::trace;

use crate::error::{HwError, Result};
use crate::mcp3304;

pub struct Mcp3304Adc {
    spi: Spi,
}

impl Mcp3304Adc {
    pub fn new(bus: Bus, slave: SlaveSelect, clock_hz: u32) -> Result<Self> {
        let spi =
            Spi::new(bus, slave, clock_hz, Mode::Mode0).map_err(|e| HwError::Spi(e.to_string()))?;
        Ok(Self { spi })
    }

    /// Open by the numeric bus and chip-select indices used in `[pins]`.
    pub fn open(bus: u8, slave: u8, clock_hz: u32) -> Result<Self> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            n => return Err(HwError::Spi(format!("unknown SPI bus {n}"))),
        };
        let slave = match slave {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            n => return Err(HwError::Spi(format!("unknown chip select {n}"))),
        };
        Self::new(bus, slave, clock_hz)
    }

    pub fn read(&mut self, channel: u8) -> Result<u16> {
        if channel >= mcp3304::CHANNELS {
            return Err(HwError::InvalidChannel(channel));
        }
        let tx = mcp3304::command_frame(channel);
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        let raw = mcp3304::decode_frame(rx);
        trace!(channel, raw, "mcp3304 sample");
        Ok(raw)
    }
}

impl AnalogInput for Mcp3304Adc {
    fn read_channel(
        &mut self,
        channel: u8,
    ) -> std::result::Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.read(channel)?)
    }
}

/// Push-pull output driving an injector or coil driver stage.
pub struct GpioActuator {
    pin: OutputPin,
}

impl GpioActuator {
    pub fn new(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut pin = gpio
            .get(bcm_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        pin.set_low(); // de-energized until the controller says otherwise
        Ok(Self { pin })
    }
}

impl Actuator for GpioActuator {
    fn set(
        &mut self,
        level: Level,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match level {
            Level::On => self.pin.set_high(),
            Level::Off => self.pin.set_low(),
        }
        Ok(())
    }
}
