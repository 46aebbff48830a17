fn main() -> mcc1608fs::Result<()> {
    env_logger::init();

    let mut daq = mcc1608fs::Daq::open()?;
    daq.blink(2)?;
    println!("vendor ID = {:#06x} / product ID = {:#06x}",
        mcc1608fs::VENDOR_ID, mcc1608fs::PRODUCT_ID);
    let serial = daq.serial_number().unwrap_or_else(|error| {
        log::warn!("serial number read failed: {}", error);
        "Unknown".to_string()
    });
    println!("serial number via control transfer = {}", serial);
    Ok(())
}
