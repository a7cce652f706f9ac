use outreach::error::Error;

#[actix_web::main]
async fn main() -> Result<(), Error> {
    outreach::run().await
}
