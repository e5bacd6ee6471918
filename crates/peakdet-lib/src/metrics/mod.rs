pub mod hrv;
