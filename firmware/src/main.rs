#![no_std]
#![no_main]

use core::cell::RefCell;

use ad7928::Ad7928;
use audio::gain::GainModel;
use audio::sampler::{on_sample_timer, SampleClock, Sampler, SamplerHandle, SharedSampler};
use audio::uac1::{self, MicArray};
use audio::RateChange;
use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::time::Hertz;
use embassy_stm32::{bind_interrupts, i2c, interrupt, peripherals, spi, timer, usb};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use mic_array_fw::*;
use rdac::Rdac;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    OTG_HS => usb::InterruptHandler<peripherals::USB_OTG_HS>;
});

type AdcDevice = ExclusiveDevice<spi::Spi<'static, Blocking>, Output<'static>, NoDelay>;
type Adc = Ad7928<AdcDevice>;
type Potentiometers = Rdac<i2c::I2c<'static, Blocking>>;
type Sampling = SamplerHandle<'static, Adc, &'static Frames, SampleTimer>;

static TIMER: Mutex<CriticalSectionRawMutex, RefCell<Option<timer::low_level::Timer<'static, peripherals::TIM2>>>> =
    Mutex::new(RefCell::new(None));
static SAMPLER: SharedSampler<Adc, &'static Frames> = Mutex::new(RefCell::new(None));

/// Paces the sampling interrupt with TIM2 update events.
struct SampleTimer;

impl SampleClock for SampleTimer {
    fn start(&mut self, sample_rate_hz: u32) {
        TIMER.lock(|timer| {
            if let Some(timer) = timer.borrow().as_ref() {
                timer.stop();
                timer.set_frequency(Hertz(sample_rate_hz));
                timer.reset();
                timer.clear_update_interrupt();
                timer.enable_update_interrupt(true);
                timer.start();
            }
        });
    }

    fn stop(&mut self) {
        TIMER.lock(|timer| {
            if let Some(timer) = timer.borrow().as_ref() {
                timer.enable_update_interrupt(false);
                timer.stop();
                timer.clear_update_interrupt();
            }
        });
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut peripheral_config = embassy_stm32::Config::default();
    {
        // Uses a 24.576 MHz external oscillator.
        use embassy_stm32::rcc::*;
        peripheral_config.rcc.hse = Some(Hse {
            freq: Hertz(24_576_000),
            mode: HseMode::Bypass,
        });
        peripheral_config.rcc.hsi = Some(HSIPrescaler::DIV1);
        peripheral_config.rcc.csi = true;
        peripheral_config.rcc.hsi48 = Some(Hsi48Config { sync_from_usb: false });
        peripheral_config.rcc.pll1 = Some(Pll {
            source: PllSource::HSE,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL80,
            divp: Some(PllDiv::DIV1), // 491.52 MHz
            divq: None,
            divr: Some(PllDiv::DIV2), // 245.76 MHz
        });
        peripheral_config.rcc.pll3 = Some(Pll {
            source: PllSource::HSE,
            prediv: PllPreDiv::DIV8,
            mul: PllMul::MUL125,
            divp: Some(PllDiv::DIV2), // 192 MHz
            divq: Some(PllDiv::DIV8), // 48 MHz for USB
            divr: Some(PllDiv::DIV2), // 192 MHz
        });
        peripheral_config.rcc.sys = Sysclk::PLL1_P; // 491.52 Mhz
        peripheral_config.rcc.ahb_pre = AHBPrescaler::DIV2;
        peripheral_config.rcc.apb1_pre = APBPrescaler::DIV2;
        peripheral_config.rcc.apb2_pre = APBPrescaler::DIV2;
        peripheral_config.rcc.apb3_pre = APBPrescaler::DIV2;
        peripheral_config.rcc.apb4_pre = APBPrescaler::DIV2;
        peripheral_config.rcc.voltage_scale = VoltageScale::Scale0;
        peripheral_config.rcc.mux.usbsel = mux::Usbsel::PLL3_Q;
    }
    let p = embassy_stm32::init(peripheral_config);

    // Converter on SPI4, with a software-controlled chip select.
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(SPI_FREQUENCY_HZ);
    spi_config.mode = spi::MODE_2; // As required by `ad7928::MODE`.

    let spi_bus = spi::Spi::new_blocking(p.SPI4, p.PE2, p.PE6, p.PE5, spi_config);
    let spi_cs = Output::new(p.PE4, Level::High, Speed::VeryHigh);
    let adc_device = unwrap!(ExclusiveDevice::new_no_delay(spi_bus, spi_cs));
    let adc = unwrap!(Ad7928::new(adc_device));

    // Gain potentiometers of the preamplifiers.
    let i2c_bus = i2c::I2c::new_blocking(p.I2C1, p.PB6, p.PB7, Hertz(I2C_FREQUENCY_HZ), Default::default());
    let potentiometers: Potentiometers = Rdac::new(i2c_bus);

    static FRAMES: StaticCell<Frames> = StaticCell::new();
    let frames: &'static Frames = FRAMES.init_with(Frames::new);

    SAMPLER.lock(|sampler| sampler.borrow_mut().replace(Sampler::new(adc, frames)));

    // Sample clock, started by the USB control handler.
    let tim2 = timer::low_level::Timer::new(p.TIM2);
    TIMER.lock(|p| p.borrow_mut().replace(tim2));

    unsafe {
        cortex_m::peripheral::NVIC::unmask(interrupt::TIM2);
    }

    static CONFIG_DESCRIPTOR: StaticCell<[u8; 768]> = StaticCell::new();
    let config_descriptor = CONFIG_DESCRIPTOR.init([0; 768]);

    static BOS_DESCRIPTOR: StaticCell<[u8; 32]> = StaticCell::new();
    let bos_descriptor = BOS_DESCRIPTOR.init([0; 32]);

    static CONTROL_BUF: StaticCell<[u8; CONTROL_BUF_SIZE]> = StaticCell::new();
    let control_buf = CONTROL_BUF.init([0; CONTROL_BUF_SIZE]);

    // Only the control endpoint receives data.
    static EP_OUT_BUFFER: StaticCell<[u8; CONTROL_BUF_SIZE]> = StaticCell::new();
    let ep_out_buffer = EP_OUT_BUFFER.init([0u8; CONTROL_BUF_SIZE]);

    static STATE: StaticCell<uac1::State<Potentiometers, Sampling>> = StaticCell::new();
    let state = STATE.init(uac1::State::new());

    // Create the driver, from the HAL.
    let mut usb_config = usb::Config::default();

    // Do not enable vbus_detection with an external HS PHY.
    usb_config.vbus_detection = false;

    // Using a Microchip PHY requires a delay during setup.
    usb_config.xcvrdly = true;

    // Initialize driver for high-speed external PHY.
    #[cfg(feature = "usb_high_speed")]
    let usb_driver = usb::Driver::new_hs_ulpi(
        p.USB_OTG_HS,
        Irqs,
        p.PA5,
        p.PC2,
        p.PC3,
        p.PC0,
        p.PA3,
        p.PB0,
        p.PB1,
        p.PB10,
        p.PB11,
        p.PB12,
        p.PB13,
        p.PB5,
        ep_out_buffer,
        usb_config,
    );

    #[cfg(not(feature = "usb_high_speed"))]
    let usb_driver = usb::Driver::new_fs_ulpi(
        p.USB_OTG_HS,
        Irqs,
        p.PA5,
        p.PC2,
        p.PC3,
        p.PC0,
        p.PA3,
        p.PB0,
        p.PB1,
        p.PB10,
        p.PB11,
        p.PB12,
        p.PB13,
        p.PB5,
        ep_out_buffer,
        usb_config,
    );

    // Basic USB device configuration
    let mut config = embassy_usb::Config::new(0x1209, 0xaf10);
    config.manufacturer = Some("Taylored Products");
    config.product = Some("8-Mic Array");
    config.self_powered = false;
    config.max_power = 100;

    // Required for windows compatibility.
    // https://developer.nordicsemi.com/nRF_Connect_SDK/doc/1.9.1/kconfig/CONFIG_CDC_ACM_IAD.html#help
    config.device_class = 0xEF;
    config.device_sub_class = 0x02;
    config.device_protocol = 0x01;
    config.composite_with_iads = true;

    let mut builder = embassy_usb::Builder::new(
        usb_driver,
        config,
        config_descriptor,
        bos_descriptor,
        &mut [], // no msos descriptors
        control_buf,
    );

    // Create the microphone array function, which owns the potentiometers and the sampler handle.
    let mic_array = MicArray::new(
        &mut builder,
        state,
        potentiometers,
        SamplerHandle::new(&SAMPLER, SampleTimer),
        GainModel::default(),
        RateChange::Deferred,
    );

    // Build and run the USB device
    let usb_device = builder.build();

    info!("Launch tasks.");
    unwrap!(spawner.spawn(usb_audio::streaming_task(mic_array, frames)));
    unwrap!(spawner.spawn(usb_audio::usb_task(usb_device)));
}

#[interrupt]
fn TIM2() {
    TIMER.lock(|timer| {
        if let Some(timer) = timer.borrow().as_ref() {
            // Clear update interrupt flag.
            timer.clear_update_interrupt();
        }
    });

    on_sample_timer(&SAMPLER);
}
