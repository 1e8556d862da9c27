//! Device and per-class configuration.

use hwctx_addresses::{DEVICE_PAGE_SIZE, ObjectClass};
use hwctx_bank::{BankError, BankSet};
use hwctx_cmdq::{BaseTableAttr, ChannelConfig};
use hwctx_hat::{GeometryError, TableGeometry, fit_chunk_size};
use utils_setters_derive::Setters;

/// Hardware generation; decides context sizes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceGeneration {
    V2,
    V3,
}

impl DeviceGeneration {
    /// Size of one context entry of `class`.
    #[must_use]
    pub const fn entry_size(self, class: ObjectClass) -> usize {
        match (class, self) {
            (ObjectClass::QueuePair, Self::V2) => 256,
            (ObjectClass::QueuePair, Self::V3) => 512,
            _ => 64,
        }
    }
}

/// Mailbox opcodes used for one class.
///
/// Base-table writes and clears address level `step` as `*_bt0 + step`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Setters)]
pub struct ClassOpcodes {
    pub write_bt0: u8,
    pub destroy_bt0: u8,
    pub create: u8,
    pub query: u8,
    pub destroy: u8,
}

impl ClassOpcodes {
    #[must_use]
    pub const fn for_class(class: ObjectClass) -> Self {
        let (write_bt0, destroy_bt0, create, query, destroy) = match class {
            ObjectClass::QueuePair => (0x00, 0x04, 0x41, 0x42, 0x45),
            ObjectClass::MemoryRegion => (0x08, 0x20, 0x0D, 0x0E, 0x0F),
            ObjectClass::CompletionQueue => (0x10, 0x24, 0x16, 0x18, 0x19),
            ObjectClass::SharedReceiveQueue => (0x30, 0x28, 0x70, 0x73, 0x74),
        };
        Self {
            write_bt0,
            destroy_bt0,
            create,
            query,
            destroy,
        }
    }

    #[must_use]
    pub const fn write_bt(&self, step: u8) -> u8 {
        self.write_bt0 + step
    }

    #[must_use]
    pub const fn destroy_bt(&self, step: u8) -> u8 {
        self.destroy_bt0 + step
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Setters)]
pub struct ClassConfig {
    #[setters(skip)]
    pub class: ObjectClass,
    /// Size of the identifier space, reserved identifiers included.
    pub object_count: u32,
    /// Identifiers below this are never handed out.
    pub reserved: u32,
    pub bank_count: u32,
    pub entry_size: usize,
    pub chunk_size: usize,
    pub hop_num: u8,
    pub opcodes: ClassOpcodes,
}

impl ClassConfig {
    /// Defaults for `class` on `generation`.
    #[must_use]
    pub const fn new(class: ObjectClass, generation: DeviceGeneration) -> Self {
        let (reserved, bank_count) = match class {
            ObjectClass::QueuePair => (8, 8),
            ObjectClass::CompletionQueue => (0, 4),
            ObjectClass::SharedReceiveQueue | ObjectClass::MemoryRegion => (0, 1),
        };
        Self {
            class,
            object_count: 1024,
            reserved,
            bank_count,
            entry_size: generation.entry_size(class),
            chunk_size: DEVICE_PAGE_SIZE,
            hop_num: 2,
            opcodes: ClassOpcodes::for_class(class),
        }
    }

    /// Smallest power-of-two chunk, at least one page, that lets the
    /// configured hop count cover `object_count` entries.
    #[must_use]
    pub fn fit_chunk_size(&self) -> Option<usize> {
        fit_chunk_size(self.entry_size, self.hop_num, self.object_count)
    }

    /// # Errors
    /// [`GeometryError`] if the table shape is unusable.
    pub fn geometry(&self) -> Result<TableGeometry, GeometryError> {
        TableGeometry::new(
            self.entry_size,
            self.chunk_size,
            self.hop_num,
            self.object_count,
        )
    }

    /// Base-table attribute word announced to the device.
    #[must_use]
    pub fn base_table_attr(&self) -> BaseTableAttr {
        let shift = (self.chunk_size / DEVICE_PAGE_SIZE).max(1).trailing_zeros();
        let shift = u8::try_from(shift.min(0xF)).unwrap_or(0xF);
        BaseTableAttr::new()
            .with_ba_page_shift(shift)
            .with_buf_page_shift(shift)
            .with_hop_num(self.hop_num & 0x3)
    }

    /// # Errors
    /// [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let class = self.class;
        BankSet::new(self.object_count, self.reserved, self.bank_count)
            .map_err(|source| ConfigError::Bank { class, source })?;
        self.geometry()
            .map_err(|source| ConfigError::Geometry { class, source })?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Setters)]
pub struct DeviceConfig {
    #[setters(skip)]
    pub generation: DeviceGeneration,
    /// Indexed by [`ObjectClass::index`]; `None` disables a class.
    pub classes: [Option<ClassConfig>; ObjectClass::COUNT],
    pub channel: ChannelConfig,
}

impl DeviceConfig {
    /// Every class enabled with its defaults for `generation`.
    #[must_use]
    pub const fn new(generation: DeviceGeneration) -> Self {
        Self {
            generation,
            classes: [
                Some(ClassConfig::new(ObjectClass::CompletionQueue, generation)),
                Some(ClassConfig::new(ObjectClass::QueuePair, generation)),
                Some(ClassConfig::new(ObjectClass::SharedReceiveQueue, generation)),
                Some(ClassConfig::new(ObjectClass::MemoryRegion, generation)),
            ],
            channel: ChannelConfig::DEFAULT,
        }
    }

    /// Replace the configuration of `config.class`.
    #[must_use]
    pub const fn with_class(mut self, config: ClassConfig) -> Self {
        self.classes[config.class.index()] = Some(config);
        self
    }

    #[must_use]
    pub const fn without_class(mut self, class: ObjectClass) -> Self {
        self.classes[class.index()] = None;
        self
    }

    #[must_use]
    pub const fn class(&self, class: ObjectClass) -> Option<&ClassConfig> {
        self.classes[class.index()].as_ref()
    }

    /// Attributes for every class slot; disabled classes announce hop 0 with
    /// page-sized chunks.
    #[must_use]
    pub fn base_table_attrs(&self) -> [BaseTableAttr; ObjectClass::COUNT] {
        ObjectClass::ALL.map(|class| {
            self.class(class)
                .map_or_else(BaseTableAttr::new, ClassConfig::base_table_attr)
        })
    }

    /// # Errors
    /// [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.channel.is_valid() {
            return Err(ConfigError::RingDepth {
                send: self.channel.send_depth,
                receive: self.channel.receive_depth,
            });
        }
        if self.classes.iter().all(Option::is_none) {
            return Err(ConfigError::NoClasses);
        }
        for (slot, class) in ObjectClass::ALL.into_iter().zip(self.classes) {
            let Some(config) = class else { continue };
            if config.class != slot {
                return Err(ConfigError::Misplaced {
                    slot,
                    found: config.class,
                });
            }
            config.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{class} identifiers: {source}")]
    Bank {
        class: ObjectClass,
        #[source]
        source: BankError,
    },
    #[error("{class} table: {source}")]
    Geometry {
        class: ObjectClass,
        #[source]
        source: GeometryError,
    },
    #[error("command ring depths {send}/{receive} must both be at least 2")]
    RingDepth { send: u32, receive: u32 },
    #[error("{found} configuration stored in the {slot} slot")]
    Misplaced {
        slot: ObjectClass,
        found: ObjectClass,
    },
    #[error("no object class is enabled")]
    NoClasses,
}
