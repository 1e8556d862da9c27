use crate::config::{ClassConfig, ConfigError, DeviceConfig};
use crate::error::Error;
use hwctx_addresses::{DeviceAddress, ObjectClass, ObjectId};
use hwctx_bank::ResourceBankAllocator;
use hwctx_cmdq::{
    Availability, ChannelError, CommandChannel, CommandDescriptor, InstanceStage,
    MAILBOX_BUFFER_SIZE, MailboxRequest, MailboxWait, ResetState,
};
use hwctx_hat::{HemTable, Release, TableLevel};
use hwctx_platform::{DeviceMemory, Platform};
use hwctx_sync::SpinMutex;
use log::{debug, error, info, trace, warn};

/// What a new object is created with.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ObjectParams<'a> {
    /// Initial context, copied to the device verbatim. At most one entry.
    pub context: &'a [u8],
    /// Banks the identifier may come from, one bit per bank.
    pub bank_mask: u32,
}

impl<'a> ObjectParams<'a> {
    #[must_use]
    pub const fn new(context: &'a [u8]) -> Self {
        Self {
            context,
            bank_mask: u32::MAX,
        }
    }

    #[must_use]
    pub const fn with_bank_mask(mut self, bank_mask: u32) -> Self {
        self.bank_mask = bank_mask;
        self
    }
}

struct ClassState<'m, M: DeviceMemory> {
    config: ClassConfig,
    ids: ResourceBankAllocator,
    /// Held while levels are linked and programmed, so a second object in the
    /// same chunk never sees it before the device does.
    table: SpinMutex<HemTable<'m, M>>,
}

/// One attached device function.
///
/// Tables are declared before the channel so they are freed first when the
/// device is dropped.
pub struct Device<'p, P: Platform> {
    classes: [Option<ClassState<'p, P::Memory>>; ObjectClass::COUNT],
    channel: CommandChannel<'p, P>,
    config: DeviceConfig,
    firmware_version: u32,
}

impl<'p, P: Platform> Device<'p, P> {
    /// Bring up the command channel, build every enabled class and hand the
    /// table roots to the device.
    ///
    /// Whatever was built before a failure is released again.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] if `config` does not validate.
    /// - [`Error::OutOfMemory`] if rings or table roots cannot be allocated.
    /// - Channel errors from the firmware queries or root programming.
    pub fn attach(platform: &'p P, config: DeviceConfig) -> Result<Self, Error> {
        config.validate()?;
        let channel = CommandChannel::new(platform, config.channel)?;
        channel
            .monitor()
            .set_instance_stage(InstanceStage::Initializing);
        let firmware_version = channel.query_firmware_version()?;

        let mut classes: [Option<ClassState<'p, P::Memory>>; ObjectClass::COUNT] =
            Default::default();
        for class_config in config.classes.iter().flatten() {
            let class = class_config.class;
            let ids = ResourceBankAllocator::new(
                class,
                class_config.object_count,
                class_config.reserved,
                class_config.bank_count,
            )
            .map_err(|source| ConfigError::Bank { class, source })?;
            let geometry = class_config
                .geometry()
                .map_err(|source| ConfigError::Geometry { class, source })?;
            let table = HemTable::new(platform.memory(), class, geometry)?;
            classes[class.index()] = Some(ClassState {
                config: *class_config,
                ids,
                table: SpinMutex::new(table),
            });
        }

        let device = Self {
            classes,
            channel,
            config,
            firmware_version,
        };
        device.program_tables()?;
        device
            .channel
            .monitor()
            .set_instance_stage(InstanceStage::Ready);
        info!(
            "device attached: {} classes, firmware {firmware_version:#010x}",
            device.classes.iter().flatten().count()
        );
        Ok(device)
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn channel(&self) -> &CommandChannel<'p, P> {
        &self.channel
    }

    #[inline]
    #[must_use]
    pub const fn firmware_version(&self) -> u32 {
        self.firmware_version
    }

    #[must_use]
    pub fn reset_state(&self) -> ResetState {
        self.channel.monitor().state()
    }

    fn state(&self, class: ObjectClass) -> Result<&ClassState<'p, P::Memory>, Error> {
        self.classes[class.index()]
            .as_ref()
            .ok_or(Error::UnknownClass(class))
    }

    fn check_available(&self) -> Result<(), Error> {
        match self.channel.monitor().check() {
            Availability::Available => Ok(()),
            Availability::Busy => Err(Error::DeviceResetting),
            Availability::Lost => Err(Error::DeviceLost),
        }
    }

    /// Announce the table shapes and give the device every root.
    fn program_tables(&self) -> Result<(), Error> {
        self.channel
            .configure_base_table_attrs(&self.config.base_table_attrs())?;
        for state in self.classes.iter().flatten() {
            let root = state.table.lock().root_address();
            if let Some(address) = root {
                self.program(state, ObjectId::new(0), TableLevel { step: 0, address })?;
            }
        }
        Ok(())
    }

    fn program(
        &self,
        state: &ClassState<'p, P::Memory>,
        id: ObjectId,
        level: TableLevel,
    ) -> Result<(), ChannelError> {
        trace!(
            "{} {id}: step {} at {}",
            state.config.class, level.step, level.address
        );
        let request = MailboxRequest::new(state.config.opcodes.write_bt(level.step), id.as_u32())
            .with_input(level.address);
        self.channel.post_mailbox(&request, MailboxWait::Poll)
    }

    /// Tell the device a level is going away. Failures are only logged; the
    /// memory is released regardless.
    fn unprogram(&self, state: &ClassState<'p, P::Memory>, id: ObjectId, level: TableLevel) {
        let request =
            MailboxRequest::new(state.config.opcodes.destroy_bt(level.step), id.as_u32())
                .with_input(level.address);
        match self.channel.post_mailbox(&request, MailboxWait::Poll) {
            Ok(()) => {}
            Err(e) if e.is_reset() => {
                debug!(
                    "{} {id}: step {} left to reset: {e}",
                    state.config.class, level.step
                );
            }
            Err(e) => error!(
                "{} {id}: failed to clear step {}: {e}",
                state.config.class, level.step
            ),
        }
    }

    /// Allocate an identifier, back it with table memory and create its
    /// context on the device.
    ///
    /// # Errors
    /// - [`Error::UnknownClass`] if `class` is disabled.
    /// - [`Error::ContextTooLarge`] if the context does not fit one entry.
    /// - [`Error::DeviceResetting`] / [`Error::DeviceLost`] when a reset is
    ///   in progress or has happened; nothing is allocated.
    /// - [`Error::Exhausted`] if no identifier is free.
    /// - [`Error::OutOfMemory`] or a device error; everything done so far is
    ///   rolled back.
    pub fn create_object(
        &self,
        class: ObjectClass,
        params: &ObjectParams<'_>,
    ) -> Result<ObjectId, Error> {
        let state = self.state(class)?;
        let max = state.config.entry_size.min(MAILBOX_BUFFER_SIZE);
        if params.context.len() > max {
            return Err(Error::ContextTooLarge {
                len: params.context.len(),
                max,
            });
        }
        self.check_available()?;

        let id = state
            .ids
            .allocate_in(params.bank_mask)
            .map_err(|_| Error::Exhausted(class))?;
        if let Err(e) = self.bind(state, id, params.context) {
            warn!("{class} {id}: create failed, rolling back: {e}");
            state.ids.release(id);
            return Err(e);
        }
        debug!("{class} {id} created");
        Ok(id)
    }

    fn bind(
        &self,
        state: &ClassState<'p, P::Memory>,
        id: ObjectId,
        context: &[u8],
    ) -> Result<(), Error> {
        {
            let mut table = state.table.lock();
            let materialized = table.materialize(id)?;
            let programmed = materialized
                .published
                .iter()
                .try_for_each(|level| self.program(state, id, *level));
            if let Err(e) = programmed {
                table.release_with(id, |level| self.unprogram(state, id, level));
                return Err(e.into());
            }
        }

        if let Err(e) = self.post_context(state, id, context) {
            state
                .table
                .lock()
                .release_with(id, |level| self.unprogram(state, id, level));
            return Err(e);
        }
        Ok(())
    }

    fn post_context(
        &self,
        state: &ClassState<'p, P::Memory>,
        id: ObjectId,
        context: &[u8],
    ) -> Result<(), Error> {
        let mut mailbox = self.channel.alloc_mailbox()?;
        mailbox.write_bytes(0, context);
        let request = MailboxRequest::new(state.config.opcodes.create, id.as_u32())
            .with_input(mailbox.device_address());
        self.channel.post_mailbox(&request, MailboxWait::Poll)?;
        Ok(())
    }

    /// Destroy the device context of `id`, then release its table entry and
    /// the identifier.
    ///
    /// Identifiers that are not live are ignored, so a repeated teardown is
    /// harmless. Local state is released even if the device does not answer.
    ///
    /// # Errors
    /// - [`Error::UnknownClass`] if `class` is disabled.
    /// - A device error not explained by a reset, reported after the local
    ///   release.
    pub fn destroy_object(&self, class: ObjectClass, id: ObjectId) -> Result<(), Error> {
        let state = self.state(class)?;
        if !state.ids.is_allocated(id) {
            debug!("{class} {id}: destroy of an identifier that is not live");
            return Ok(());
        }

        let request = MailboxRequest::new(state.config.opcodes.destroy, id.as_u32());
        let device = self.channel.post_mailbox(&request, MailboxWait::Poll);

        let release = state
            .table
            .lock()
            .release_with(id, |level| self.unprogram(state, id, level));
        if let Release::Freed { levels } = release {
            trace!("{class} {id}: {levels} levels freed");
        }
        state.ids.release(id);

        match device {
            Ok(()) => {
                debug!("{class} {id} destroyed");
                Ok(())
            }
            Err(e) if e.is_reset() => {
                warn!("{class} {id}: released locally during reset: {e}");
                Ok(())
            }
            Err(e) => {
                error!("{class} {id}: device did not destroy the context: {e}");
                Err(e.into())
            }
        }
    }

    /// Read the device's current context of `id` into `out`. Returns how many
    /// bytes were written, at most one entry.
    ///
    /// # Errors
    /// - [`Error::UnknownClass`] if `class` is disabled.
    /// - [`Error::NotLive`] if `id` is not allocated.
    /// - Channel errors, including reset-attributed ones.
    pub fn query_object(
        &self,
        class: ObjectClass,
        id: ObjectId,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let state = self.state(class)?;
        if !state.ids.is_allocated(id) {
            return Err(Error::NotLive { class, id });
        }
        let mailbox = self.channel.alloc_mailbox()?;
        let request = MailboxRequest::new(state.config.opcodes.query, id.as_u32())
            .with_output(mailbox.device_address());
        self.channel.post_mailbox(&request, MailboxWait::Poll)?;

        let len = out
            .len()
            .min(state.config.entry_size)
            .min(MAILBOX_BUFFER_SIZE);
        mailbox.read_bytes(0, &mut out[..len]);
        Ok(len)
    }

    /// Device address and size of the entry backing `id`, if it is
    /// materialised.
    #[must_use]
    pub fn find_table_entry(
        &self,
        class: ObjectClass,
        id: ObjectId,
    ) -> Option<(DeviceAddress, usize)> {
        let state = self.classes[class.index()].as_ref()?;
        state.table.lock().find_entry(id)
    }

    /// Live identifiers of `class`; zero for a disabled class.
    #[must_use]
    pub fn live_objects(&self, class: ObjectClass) -> u32 {
        self.classes[class.index()]
            .as_ref()
            .map_or(0, |state| state.ids.total_in_use())
    }

    /// Leaf chunks of `class` currently backed by memory.
    #[must_use]
    pub fn live_chunks(&self, class: ObjectClass) -> usize {
        self.classes[class.index()]
            .as_ref()
            .map_or(0, |state| state.table.lock().live_chunks())
    }

    /// Holds on the leaf chunk that backs `id`.
    #[must_use]
    pub fn chunk_ref_count(&self, class: ObjectClass, id: ObjectId) -> u32 {
        self.classes[class.index()]
            .as_ref()
            .map_or(0, |state| state.table.lock().ref_count(id))
    }

    /// Per-bank identifier use of `class`.
    #[must_use]
    pub fn bank_load(&self, class: ObjectClass) -> alloc::vec::Vec<u32> {
        self.classes[class.index()]
            .as_ref()
            .map(|state| state.ids.load())
            .unwrap_or_default()
    }

    /// The device is about to be reset.
    pub fn notify_reset_down(&self) {
        info!("reset: down");
        self.channel.monitor().notify_down();
    }

    /// The device is held in reset.
    pub fn notify_reset_uninit(&self) {
        info!("reset: uninit");
        self.channel.monitor().notify_uninit();
    }

    /// The device came back. Re-announce the table shapes and roots.
    ///
    /// Contexts of objects that were live before the reset are gone; their
    /// owners are expected to destroy and recreate them.
    ///
    /// # Errors
    /// Any error from reprogramming; the monitor then reports the device as
    /// lost.
    pub fn notify_reset_init(&self) -> Result<(), Error> {
        info!("reset: init");
        let monitor = self.channel.monitor();
        monitor.notify_init_begin();
        match self.program_tables() {
            Ok(()) => {
                monitor.notify_init_done();
                info!("reset: device reinitialised");
                Ok(())
            }
            Err(e) => {
                error!("reset: reinitialisation failed: {e}");
                monitor.notify_init_failed();
                Err(e)
            }
        }
    }

    /// Ring a data-path doorbell. Returns `false` while a reset has
    /// disabled doorbells.
    pub fn ring_doorbell(&self, value: u64) -> bool {
        self.channel.ring_doorbell(value)
    }

    /// Hand messages the device queued on the receive ring to `handler`.
    pub fn poll_device_messages(&self, handler: impl FnMut(&CommandDescriptor)) -> usize {
        self.channel.poll_receive(handler)
    }

    /// Clear the function on the device and free every table, then the
    /// rings.
    pub fn detach(mut self) {
        if self.channel.monitor().check().is_available()
            && let Err(e) = self.channel.function_clear()
        {
            warn!("function clear failed on detach: {e}");
        }
        for state in self.classes.iter_mut().flatten() {
            let live = state.ids.total_in_use();
            if live != 0 {
                warn!("{}: {live} objects still live at detach", state.config.class);
            }
            state.table.get_mut().destroy();
        }
        info!("device detached");
    }
}
