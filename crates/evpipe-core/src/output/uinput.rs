// Evpipe uinput Output Backend
// Virtual device creation and event injection through /dev/uinput

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    RelativeAxisType, UinputAbsSetup,
};

use super::manager::{OutputError, OutputResult, VirtualDeviceFactory, VirtualInput};
use crate::input::codes::{EV_ABS, EV_KEY, EV_REL, EV_SYN};
use crate::protocol::{Capability, DeviceDescriptor};

/// Appended to every virtual device name so the devices are recognizable.
pub const VIRTUAL_NAME_SUFFIX: &str = " (via evpipe)";

fn creation_error(e: std::io::Error) -> OutputError {
    OutputError::DeviceCreation(e.to_string())
}

/// Creates uinput-backed virtual devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct UinputFactory;

impl VirtualDeviceFactory for UinputFactory {
    fn create(&mut self, descriptor: &DeviceDescriptor) -> OutputResult<Box<dyn VirtualInput>> {
        if let Some((event_type, code)) = descriptor.out_of_range_code() {
            return Err(OutputError::DeviceCreation(format!(
                "{}: code {} out of range for event type {}",
                descriptor.name, code, event_type
            )));
        }

        let name = format!("{}{}", descriptor.name, VIRTUAL_NAME_SUFFIX);
        let mut builder = VirtualDeviceBuilder::new()
            .map_err(creation_error)?
            .name(&name)
            .input_id(InputId::new(
                BusType::BUS_USB,
                descriptor.vendor,
                descriptor.product,
                1,
            ));

        for (event_type, capabilities) in &descriptor.capabilities {
            match *event_type {
                EV_KEY => {
                    let mut keys = AttributeSet::<Key>::new();
                    for capability in capabilities {
                        keys.insert(Key::new(capability.code()));
                    }
                    builder = builder.with_keys(&keys).map_err(creation_error)?;
                }
                EV_REL => {
                    let mut axes = AttributeSet::<RelativeAxisType>::new();
                    for capability in capabilities {
                        axes.insert(RelativeAxisType(capability.code()));
                    }
                    builder = builder.with_relative_axes(&axes).map_err(creation_error)?;
                }
                EV_ABS => {
                    for capability in capabilities {
                        let Capability::AbsAxis(code, info) = capability else {
                            log::warn!(
                                "{}: absolute axis {} has no range, skipped",
                                descriptor.name,
                                capability.code()
                            );
                            continue;
                        };
                        let setup = UinputAbsSetup::new(
                            AbsoluteAxisType(*code),
                            AbsInfo::new(
                                info.value,
                                info.min,
                                info.max,
                                info.fuzz,
                                info.flat,
                                info.resolution,
                            ),
                        );
                        builder = builder.with_absolute_axis(&setup).map_err(creation_error)?;
                    }
                }
                EV_SYN => return Err(OutputError::SyncCapability(descriptor.name.clone())),
                other => {
                    log::warn!(
                        "{}: event type {} is not supported by uinput output, skipped",
                        descriptor.name,
                        other
                    );
                }
            }
        }

        let device = builder.build().map_err(creation_error)?;
        Ok(Box::new(UinputDevice { device }))
    }
}

/// A live uinput device.
pub struct UinputDevice {
    device: VirtualDevice,
}

impl VirtualInput for UinputDevice {
    fn inject(&mut self, event_type: u16, code: u16, value: i32) -> OutputResult<()> {
        // emit() terminates every batch with SYN_REPORT already
        if event_type == EV_SYN {
            return Ok(());
        }
        let event = InputEvent::new(EventType(event_type), code, value);
        self.device
            .emit(&[event])
            .map_err(|e: std::io::Error| OutputError::WriteError(e.to_string()))
    }
}
