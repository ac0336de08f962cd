mod helpers;

mod driver;
