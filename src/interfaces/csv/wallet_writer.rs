use crate::domain::wallet::Wallet;
use crate::error::Result;
use std::io::Write;

/// Writes final balances as `user,balance` CSV.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) -> Result<()> {
        self.writer.write_record(["user", "balance"])?;
        for wallet in wallets {
            self.writer.write_record([
                wallet.user_id.to_string(),
                wallet.balance.value().normalize().to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
