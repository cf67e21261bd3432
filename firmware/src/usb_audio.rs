use audio::sampler::SAMPLE_SIZE;
use audio::topology::CONFIGURATIONS;
use audio::uac1::{MicArray, MAX_PACKET_SIZE};
use defmt::{debug, info, panic};
use embassy_stm32::{peripherals, usb};
use embassy_usb::driver::EndpointError;

use crate::*;

struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

async fn stream_handler<'d, T: usb::Instance + 'd>(
    mic_array: &mut MicArray<'d, usb::Driver<'d, T>>,
    configuration_index: usize,
    frames: &Frames,
) -> Result<(), Disconnected> {
    let frame_size = CONFIGURATIONS[configuration_index].channel_count() * SAMPLE_SIZE;
    let packet_size = mic_array.max_packet_size(configuration_index) as usize;

    debug!("Frame size {} byte, packet size {} byte", frame_size, packet_size);

    loop {
        let mut usb_data = [0u8; MAX_PACKET_SIZE];
        // Empty while the sampler already produces frames of the next configuration.
        let data_size = frames.take_frames(frame_size, &mut usb_data[..packet_size]);

        mic_array.write_packet(configuration_index, &usb_data[..data_size]).await?;
    }
}

/// Sends queued sample frames to the host, on the endpoint of the selected alternate setting.
#[embassy_executor::task]
pub async fn streaming_task(
    mut mic_array: MicArray<'static, usb::Driver<'static, peripherals::USB_OTG_HS>>,
    frames: &'static Frames,
) {
    loop {
        let configuration_index = mic_array.wait_connection().await;

        info!(
            "Stream connected (alternate setting {})",
            CONFIGURATIONS[configuration_index].alternate_setting
        );
        _ = stream_handler(&mut mic_array, configuration_index, frames).await;
        info!("Stream disconnected");
    }
}

/// Runs the USB device.
#[embassy_executor::task]
pub async fn usb_task(mut usb_device: embassy_usb::UsbDevice<'static, usb::Driver<'static, peripherals::USB_OTG_HS>>) {
    info!("Launch USB task.");

    loop {
        usb_device.run_until_suspend().await;
        info!("USB suspended");

        usb_device.wait_resume().await;
    }
}
