//! # Object Context Binder
//!
//! Ties identifier allocation, address tables and the command channel
//! together into the object lifecycle a higher layer uses: create a queue
//! pair, completion queue, shared receive queue or memory region on the
//! device, look up where its context lives, destroy it again.
//!
//! ```text
//!  create_object(class, params)                destroy_object(class, id)
//!    1. reset check (fail fast)                  1. ignore ids that are not live
//!    2. allocate id ─────────── banks            2. DESTROY context (mailbox)
//!    3. materialize ─────────── table            3. release table entry,
//!    4. WRITE_BT per new level  (mailbox)           DESTROY_BT per unlinked level
//!    5. CREATE context          (mailbox)        4. release id
//!       any failure: undo 4..2 in reverse
//! ```
//!
//! One [`Device`] exists per attached device function and owns one
//! allocator and one table per enabled [`ObjectClass`], plus the
//! [`CommandChannel`]. Everything is torn down when the device is detached
//! or dropped; tables go before the rings they were announced through.
//!
//! ## Resets
//!
//! Creating an object while a reset is under way fails with
//! [`Error::DeviceResetting`] before anything is allocated. Destroying one is
//! always completed locally; a device that cannot acknowledge because it is
//! resetting is not an error, since the reset clears its copy anyway. After
//! the device comes back, [`Device::notify_reset_init`] hands it the table
//! roots again.
//!
//! ```no_run
//! # fn demo<P: hwctx_platform::Platform>(platform: &P) -> Result<(), hwctx::Error> {
//! use hwctx::{Device, DeviceConfig, DeviceGeneration, ObjectParams};
//! use hwctx_addresses::ObjectClass;
//!
//! let device = Device::attach(platform, DeviceConfig::new(DeviceGeneration::V2))?;
//! let cq = device.create_object(ObjectClass::CompletionQueue, &ObjectParams::new(&[0; 64]))?;
//! let (entry, size) = device
//!     .find_table_entry(ObjectClass::CompletionQueue, cq)
//!     .expect("created objects are materialised");
//! # let _ = (entry, size);
//! device.destroy_object(ObjectClass::CompletionQueue, cq)?;
//! device.detach();
//! # Ok(())
//! # }
//! ```
//!
//! [`CommandChannel`]: hwctx_cmdq::CommandChannel
//! [`ObjectClass`]: hwctx_addresses::ObjectClass

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod device;
mod error;

pub use config::{ClassConfig, ClassOpcodes, ConfigError, DeviceConfig, DeviceGeneration};
pub use device::{Device, ObjectParams};
pub use error::Error;
