use super::{json_pretty, Context, EXIT_SUCCESS};
use confit_backend::EnvironmentDetector;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let env = EnvironmentDetector::new().detect();

    if ctx.json {
        println!("{}", json_pretty(&env)?);
    } else {
        println!("os family:       {}", env.os_family);
        println!("os version:      {}", env.os_version);
        println!("kernel:          {}", env.kernel_version);
        println!("service manager: {}", env.service_manager);
        println!("package manager: {}", env.package_manager);
        println!("dns manager:     {}", env.dns_manager);
    }
    Ok(EXIT_SUCCESS)
}
