//! Microchip MCP9902 dual channel temperature sensor.
//!
//! The chip reports its own (local) temperature and that of one external
//! (remote) diode. Readings use the extended range encoding: an integer byte
//! offset by 64 degrees plus three fraction bits of 0.125 degrees. All values
//! crossing the API are milli-degrees Celsius.

use std::sync::Arc;

use num_enum::IntoPrimitive;

use super::{RegisterCache, SmbusDevice};
use crate::{
    arbiter::BusArbiter,
    attr::{parse_decimal, AttrMode, Attribute, AttributeGroup},
    config::CacheConfig,
    error::{Error, Result},
};

const REG_R_CHIP_ID: u8 = 0xfd;
const REG_R_MAN_ID: u8 = 0xfe;
const REG_W_CONFIG: u8 = 0x09;
const REG_W_CONVRATE: u8 = 0x0a;
const REG_R_STATUS: u8 = 0x02;

const MANUFACTURER_ID: u8 = 0x5d;
const CHIP_ID: u8 = 0x04;

/// 2 Hz conversion rate
const CONVRATE_2HZ: u8 = 0x05;
/// Run mode, extended temperature range, alerts in comparator mode
const CONFIG_RUN_EXTENDED: u8 = 0x9f;

/// Logical registers held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum TempIndex {
    Input1 = 0,
    Input1Fraction,
    Input2,
    Input2Fraction,
    Low1,
    High1,
    Crit1,
    Low2,
    High2,
    Crit2,
    Hyst,
}

const NUM_REGS: usize = 11;

/// Read address of every logical register, indexed by [`TempIndex`]
const READ_MAP: [u8; NUM_REGS] = [
    0x00, // local temperature
    0x29, // local temperature fraction
    0x01, // remote temperature
    0x10, // remote temperature fraction
    0x06, // local low limit
    0x05, // local high limit
    0x20, // local critical limit
    0x08, // remote low limit
    0x07, // remote high limit
    0x19, // remote critical limit
    0x21, // critical hysteresis
];

impl TempIndex {
    fn slot(self) -> usize {
        u8::from(self) as usize
    }

    /// Write address of the register, for the writable limits only
    pub fn write_register(self) -> Option<u8> {
        match self {
            TempIndex::Low1 => Some(0x0c),
            TempIndex::High1 => Some(0x0b),
            TempIndex::Crit1 => Some(0x20),
            TempIndex::Low2 => Some(0x0e),
            TempIndex::High2 => Some(0x0d),
            TempIndex::Crit2 => Some(0x19),
            TempIndex::Hyst => Some(0x21),
            TempIndex::Input1
            | TempIndex::Input1Fraction
            | TempIndex::Input2
            | TempIndex::Input2Fraction => None,
        }
    }

    /// The fraction register belonging to an input channel
    fn fraction(self) -> Option<TempIndex> {
        match self {
            TempIndex::Input1 => Some(TempIndex::Input1Fraction),
            TempIndex::Input2 => Some(TempIndex::Input2Fraction),
            _ => None,
        }
    }
}

/// Decode a raw reading to milli-degrees.
///
/// Only the top three bits of the fraction register carry data, in steps of
/// 125 milli-degrees.
pub fn temp_from_reg(raw: u8, fraction: u8) -> i32 {
    (raw as i32 - 64) * 1000 + ((fraction as i32 & 0xe0) >> 5) * 125
}

/// Encode milli-degrees into a limit register.
///
/// Limits have whole degree resolution: the value is floored to a multiple
/// of 1000 and clamped to the extended range of -64 to 191 degrees.
pub fn temp_to_reg(millis: i64) -> u8 {
    (millis.div_euclid(1000) + 64).clamp(0, 255) as u8
}

/// One MCP9902 behind the shared bus
#[derive(Debug)]
pub struct Mcp9902<D> {
    cache: RegisterCache<D, NUM_REGS>,
}

impl<D: SmbusDevice> Mcp9902<D> {
    pub fn new(device: D, arbiter: Arc<BusArbiter>, config: CacheConfig) -> Self {
        Self {
            cache: RegisterCache::new(device, arbiter, config, READ_MAP, REG_R_STATUS),
        }
    }

    pub fn cache(&self) -> &RegisterCache<D, NUM_REGS> {
        &self.cache
    }

    /// Check the identification registers, failing with
    /// [`Error::NotFound`] for anything but an MCP9902.
    pub fn detect(&self) -> Result<()> {
        let (manufacturer, chip) = self.cache.transaction(|device| {
            Ok((
                device.read_byte_data(REG_R_MAN_ID)?,
                device.read_byte_data(REG_R_CHIP_ID)?,
            ))
        })?;

        if manufacturer != MANUFACTURER_ID || chip != CHIP_ID {
            log::info!(
                "Unsupported chip (man_id={manufacturer:#04x}, chip_id={chip:#04x})"
            );
            return Err(Error::NotFound(format!(
                "mcp9902 (man_id={manufacturer:#04x}, chip_id={chip:#04x})"
            )));
        }

        Ok(())
    }

    /// Start the conversions at 2 Hz in extended range mode
    pub fn init(&self) -> Result<()> {
        self.cache.transaction(|device| {
            device.write_byte_data(REG_W_CONVRATE, CONVRATE_2HZ)?;
            device.write_byte_data(REG_W_CONFIG, CONFIG_RUN_EXTENDED)
        })
    }

    /// Current value of a temperature register in milli-degrees. Input
    /// channels include their fraction bits, limits do not have any.
    pub fn temperature(&self, index: TempIndex) -> Result<i32> {
        let snapshot = self.cache.refresh()?;
        let fraction = index
            .fraction()
            .and_then(|f| snapshot.value(f.slot()))
            .unwrap_or(0);
        let raw = snapshot
            .value(index.slot())
            .ok_or_else(|| Error::invalid(format!("{index:?} is not cached")))?;
        Ok(temp_from_reg(raw, fraction))
    }

    /// Program a limit register. The cached value is updated without reading
    /// the register back.
    pub fn set_temperature(&self, index: TempIndex, millis: i64) -> Result<()> {
        let command = index
            .write_register()
            .ok_or_else(|| Error::invalid(format!("{index:?} is not writable")))?;
        self.cache.write(index.slot(), command, temp_to_reg(millis))
    }

    /// Raw alarm (status) register
    pub fn alarms(&self) -> Result<u8> {
        Ok(self.cache.refresh()?.alarms())
    }

    /// A single bit of the alarm register
    pub fn alarm(&self, bit: u8) -> Result<bool> {
        Ok((self.alarms()? >> bit) & 1 == 1)
    }
}

const ATTRIBUTES: &[Attribute] = &[
    Attribute::new("temp1_input", AttrMode::ReadOnly),
    Attribute::new("temp2_input", AttrMode::ReadOnly),
    Attribute::new("temp1_min", AttrMode::ReadWrite),
    Attribute::new("temp1_max", AttrMode::ReadWrite),
    Attribute::new("temp1_crit", AttrMode::ReadWrite),
    Attribute::new("temp2_min", AttrMode::ReadWrite),
    Attribute::new("temp2_max", AttrMode::ReadWrite),
    Attribute::new("temp2_crit", AttrMode::ReadWrite),
    Attribute::new("temp_crit_hyst", AttrMode::ReadWrite),
    Attribute::new("alarms", AttrMode::ReadOnly),
    Attribute::new("temp1_crit_alarm", AttrMode::ReadOnly),
    Attribute::new("temp2_crit_alarm", AttrMode::ReadOnly),
    Attribute::new("temp2_fault", AttrMode::ReadOnly),
    Attribute::new("temp2_min_alarm", AttrMode::ReadOnly),
    Attribute::new("temp2_max_alarm", AttrMode::ReadOnly),
    Attribute::new("temp1_min_alarm", AttrMode::ReadOnly),
    Attribute::new("temp1_max_alarm", AttrMode::ReadOnly),
];

enum Sensor {
    Temp(TempIndex),
    Alarms,
    Alarm(u8),
}

fn sensor(name: &str) -> Option<Sensor> {
    let sensor = match name {
        "temp1_input" => Sensor::Temp(TempIndex::Input1),
        "temp2_input" => Sensor::Temp(TempIndex::Input2),
        "temp1_min" => Sensor::Temp(TempIndex::Low1),
        "temp1_max" => Sensor::Temp(TempIndex::High1),
        "temp1_crit" => Sensor::Temp(TempIndex::Crit1),
        "temp2_min" => Sensor::Temp(TempIndex::Low2),
        "temp2_max" => Sensor::Temp(TempIndex::High2),
        "temp2_crit" => Sensor::Temp(TempIndex::Crit2),
        "temp_crit_hyst" => Sensor::Temp(TempIndex::Hyst),
        "alarms" => Sensor::Alarms,
        "temp1_crit_alarm" => Sensor::Alarm(0),
        "temp2_crit_alarm" => Sensor::Alarm(1),
        "temp2_fault" => Sensor::Alarm(2),
        "temp2_min_alarm" => Sensor::Alarm(3),
        "temp2_max_alarm" => Sensor::Alarm(4),
        "temp1_min_alarm" => Sensor::Alarm(5),
        "temp1_max_alarm" => Sensor::Alarm(6),
        _ => return None,
    };
    Some(sensor)
}

impl<D: SmbusDevice> AttributeGroup for Mcp9902<D> {
    fn name(&self) -> &'static str {
        "hwmon"
    }

    fn attributes(&self) -> &'static [Attribute] {
        ATTRIBUTES
    }

    fn show(&self, attribute: &Attribute) -> Result<String> {
        match sensor(attribute.name) {
            Some(Sensor::Temp(index)) => Ok(format!("{}\n", self.temperature(index)?)),
            Some(Sensor::Alarms) => Ok(format!("{}\n", self.alarms()?)),
            Some(Sensor::Alarm(bit)) => Ok(format!("{}\n", self.alarm(bit)? as u8)),
            None => Err(Error::NotFound(attribute.name.to_owned())),
        }
    }

    fn store(&self, attribute: &Attribute, input: &str) -> Result<usize> {
        match sensor(attribute.name) {
            Some(Sensor::Temp(index)) => {
                let millis = parse_decimal::<i64>(input)?;
                self.set_temperature(index, millis)?;
                Ok(input.len())
            }
            Some(_) => Err(Error::PermissionDenied),
            None => Err(Error::NotFound(attribute.name.to_owned())),
        }
    }
}
