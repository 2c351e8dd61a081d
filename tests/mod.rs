mod support;

mod immediate_tests;
mod router_tests;
mod sendgrid_tests;
