//! npk-bridge: RS485 NPK soil sensor to MQTT telemetry.

use npk_bridge::{BridgeArgs, run_bridge};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_bridge(BridgeArgs::parse()).await
}
