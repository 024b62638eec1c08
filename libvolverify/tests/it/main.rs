mod provisioning;
mod scenarios;
mod suite;
