pub mod toyyibpay;
