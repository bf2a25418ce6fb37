/****************** Discovery ****************/
mod scenarios;

/****************** Properties ***************/
mod properties;
