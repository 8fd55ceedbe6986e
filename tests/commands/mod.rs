mod test_contacts;
mod test_run;
