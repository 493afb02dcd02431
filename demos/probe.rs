use aostream::enumerate;
use aostream::Device;
use aostream::DeviceTrait;

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let devs = enumerate()?;
    println!("Devices");
    println!("=========================================");
    println!("devs: {devs:?}");

    for d in devs {
        let dev = Device::from_args(d)?;

        println!();
        println!("Device ({:?} - {:?}), ", dev.driver(), dev.id()?);
        println!("=========================================");

        println!("driver:       {:?}", dev.driver());
        println!("id:           {:?}", dev.id()?);
        println!("info:         {:?}", dev.info()?);
        println!("terminals:    {:?}", dev.terminals()?);
        println!("sample rate range: {:?}", dev.sample_rate_range()?);
        for ch in dev.ao_channels()? {
            println!("{ch:<13} {:?}", dev.voltage_range(&ch)?);
        }
    }

    Ok(())
}
