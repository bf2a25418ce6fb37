/****************** Simulation ***************/
mod discovery;
mod tree;

/****************** Platform *****************/
mod hwmp_sim;
